// This module is the example target: a GPU with segmented 32-bit address spaces next to
// a 64-bit flat address space. subtarget describes generations and feature flags and
// implements TargetCapabilities, legalizer_info builds and verifies the rule table and
// provides AmdgpuLegalizer, and addrspace_cast holds the custom lowering of pointer
// casts between address spaces.

//! Example GPU target.

pub mod addrspace_cast;
pub mod legalizer_info;
pub mod subtarget;

pub use addrspace_cast::{legalize_addrspace_cast, QUEUE_PTR};
pub use legalizer_info::{build_legalizer_info, AmdgpuLegalizer};
pub use subtarget::{addr_space, Generation, Subtarget, S_GETREG_B32};
