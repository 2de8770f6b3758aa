// This module implements a reference interpreter for generic machine IR. It executes a
// function straight-line over concrete bit patterns and is used to check that a
// legalized function still computes what the original computed: run both on the same
// arguments and compare the results. Every value is held as a list of lanes, one per
// vector element (a single lane for scalars and pointers), each lane a bit pattern of
// at most 128 bits kept masked to the element width. Operations that reinterpret bits
// across lanes (bitcasts, merges, unmerges, bit-range extracts and inserts, memory
// accesses) go through a flat little-endian bit string. Memory, target instructions and
// live-in registers are supplied by an InterpEnv; MemoryEnv is a simple byte-addressed
// implementation keyed by address space. Floating point values of 16, 32 and 64 bits
// are computed in double precision and rounded back to their width.

//! Reference interpreter for generic machine IR.

use hashbrown::HashMap;
use log::trace;
use thiserror::Error;

use crate::core::{LowLevelType, MachineFunction, MachineInst, MemDesc, Opcode, ValueId};

/// Errors raised while interpreting a function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpError {
    #[error("{opcode} cannot be interpreted")]
    Unsupported { opcode: String },

    #[error("{ty} is too wide to interpret")]
    TooWide { ty: String },

    #[error("{function} takes {expected} arguments, got {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("Argument {index} has {found} lanes, its type {ty} has {expected}")]
    ArgumentShape {
        index: usize,
        ty: String,
        expected: usize,
        found: usize,
    },

    #[error("Value {value} is used before it is defined")]
    UndefinedValue { value: String },

    #[error("Malformed {opcode}: {reason}")]
    Malformed { opcode: String, reason: String },

    #[error("Read of uninitialized memory at {addr_space}:{addr:#x}")]
    UninitializedMemory { addr_space: u32, addr: u64 },

    #[error("No value for live-in register {name}")]
    UnknownLiveIn { name: String },

    #[error("No behavior for target instruction {name}")]
    UnknownTargetInst { name: String },
}

pub type InterpResult<T> = Result<T, InterpError>;

/// Everything outside the function an interpreted instruction can touch.
pub trait InterpEnv {
    /// Read `bytes` bytes starting at `addr`.
    fn load(&mut self, addr_space: u32, addr: u64, bytes: u32) -> InterpResult<Vec<u8>>;

    fn store(&mut self, addr_space: u32, addr: u64, data: &[u8]) -> InterpResult<()>;

    /// Result of a target instruction with the given immediates.
    fn execute_target(&mut self, name: &str, imms: &[i64]) -> InterpResult<u128>;

    fn live_in(&mut self, name: &str) -> InterpResult<u128>;
}

/// Byte-addressed memory with fixed target instruction results and live-ins.
#[derive(Debug, Default, Clone)]
pub struct MemoryEnv {
    memory: HashMap<(u32, u64), u8>,
    target_results: HashMap<(String, i64), u128>,
    live_ins: HashMap<String, u128>,
}

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` little-endian in `bytes` bytes at `addr`.
    pub fn write(&mut self, addr_space: u32, addr: u64, value: u128, bytes: u32) {
        for i in 0..bytes.min(16) {
            let byte = (value >> (8 * i)) as u8;
            self.memory.insert((addr_space, addr.wrapping_add(u64::from(i))), byte);
        }
    }

    /// Read `bytes` bytes at `addr` as a little-endian value, if all are initialized.
    pub fn read(&self, addr_space: u32, addr: u64, bytes: u32) -> Option<u128> {
        let mut value = 0u128;
        for i in 0..bytes.min(16) {
            let byte = self.memory.get(&(addr_space, addr.wrapping_add(u64::from(i))))?;
            value |= u128::from(*byte) << (8 * i);
        }
        Some(value)
    }

    /// Make the target instruction `name` return `result` when its first immediate is `imm`.
    pub fn set_target_result(&mut self, name: &str, imm: i64, result: u128) {
        self.target_results.insert((name.to_string(), imm), result);
    }

    pub fn set_live_in(&mut self, name: &str, value: u128) {
        self.live_ins.insert(name.to_string(), value);
    }
}

impl InterpEnv for MemoryEnv {
    fn load(&mut self, addr_space: u32, addr: u64, bytes: u32) -> InterpResult<Vec<u8>> {
        (0..u64::from(bytes))
            .map(|i| {
                let at = addr.wrapping_add(i);
                self.memory
                    .get(&(addr_space, at))
                    .copied()
                    .ok_or(InterpError::UninitializedMemory { addr_space, addr: at })
            })
            .collect()
    }

    fn store(&mut self, addr_space: u32, addr: u64, data: &[u8]) -> InterpResult<()> {
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert((addr_space, addr.wrapping_add(i as u64)), *byte);
        }
        Ok(())
    }

    fn execute_target(&mut self, name: &str, imms: &[i64]) -> InterpResult<u128> {
        let key = (name.to_string(), imms.first().copied().unwrap_or(0));
        self.target_results
            .get(&key)
            .copied()
            .ok_or_else(|| InterpError::UnknownTargetInst { name: name.to_string() })
    }

    fn live_in(&mut self, name: &str) -> InterpResult<u128> {
        self.live_ins
            .get(name)
            .copied()
            .ok_or_else(|| InterpError::UnknownLiveIn { name: name.to_string() })
    }
}

/// Values computed by one run, as lanes.
#[derive(Debug, Default, Clone)]
pub struct Frame {
    values: HashMap<ValueId, Vec<u128>>,
}

impl Frame {
    pub fn get(&self, value: ValueId) -> Option<&[u128]> {
        self.values.get(&value).map(Vec::as_slice)
    }

    /// The single lane of a scalar or pointer value.
    pub fn scalar(&self, value: ValueId) -> Option<u128> {
        match self.get(value)? {
            [lane] => Some(*lane),
            _ => None,
        }
    }
}

/// Execute `mf` on `args`, given as lanes per argument.
pub fn run(mf: &MachineFunction, args: &[Vec<u128>], env: &mut dyn InterpEnv) -> InterpResult<Frame> {
    if args.len() != mf.args().len() {
        return Err(InterpError::ArgumentCount {
            function: mf.name().to_string(),
            expected: mf.args().len(),
            found: args.len(),
        });
    }

    let mut interp = Interpreter { mf, env, frame: Frame::default() };
    for (index, (&arg, lanes)) in mf.args().iter().zip(args).enumerate() {
        let ty = mf.value_type(arg);
        check_width(ty)?;
        if lanes.len() != ty.num_elements() as usize {
            return Err(InterpError::ArgumentShape {
                index,
                ty: ty.to_string(),
                expected: ty.num_elements() as usize,
                found: lanes.len(),
            });
        }
        let bits = ty.scalar_size_in_bits();
        interp.frame.values.insert(arg, lanes.iter().map(|&l| l & mask(bits)).collect());
    }
    for (name, value) in mf.live_ins() {
        let ty = mf.value_type(*value);
        check_width(ty)?;
        let raw = interp.env.live_in(name)?;
        interp.frame.values.insert(*value, vec![raw & mask(ty.scalar_size_in_bits())]);
    }

    for (_, inst) in mf.instructions() {
        interp.execute(inst)?;
    }
    Ok(interp.frame)
}

const fn mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

fn sext(value: u128, bits: u32) -> i128 {
    let shift = 128 - bits.clamp(1, 128);
    ((value << shift) as i128) >> shift
}

fn check_width(ty: LowLevelType) -> InterpResult<()> {
    if ty.scalar_size_in_bits() > 128 {
        return Err(InterpError::TooWide { ty: ty.to_string() });
    }
    Ok(())
}

// Flat bit strings, lowest bit first.

fn pack(lanes: &[u128], elem_bits: u32) -> Vec<bool> {
    lanes
        .iter()
        .flat_map(|&lane| (0..elem_bits).map(move |i| i < 128 && (lane >> i) & 1 == 1))
        .collect()
}

fn get_bits(bits: &[bool], offset: usize, width: u32) -> u128 {
    (0..width as usize)
        .filter(|&i| bits.get(offset + i).copied().unwrap_or(false))
        .fold(0u128, |acc, i| acc | (1u128 << i))
}

fn unpack(bits: &[bool], ty: LowLevelType) -> Vec<u128> {
    let elem_bits = ty.scalar_size_in_bits();
    (0..ty.num_elements() as usize)
        .map(|lane| get_bits(bits, lane * elem_bits as usize, elem_bits))
        .collect()
}

fn to_bytes(bits: &[bool], bytes: u32) -> Vec<u8> {
    (0..bytes as usize).map(|i| get_bits(bits, i * 8, 8) as u8).collect()
}

fn from_bytes(data: &[u8]) -> Vec<bool> {
    pack(&data.iter().map(|&b| u128::from(b)).collect::<Vec<_>>(), 8)
}

// Floating point.

fn half_to_f32(h: u16) -> f32 {
    let negative = h & 0x8000 != 0;
    let exp = u32::from((h >> 10) & 0x1f);
    let mant = u32::from(h & 0x3ff);
    let magnitude = match exp {
        0 => mant as f32 * 2f32.powi(-24),
        0x1f => f32::from_bits(0x7f80_0000 | (mant << 13)),
        _ => f32::from_bits(((exp + 112) << 23) | (mant << 13)),
    };
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn f32_to_half(v: f32) -> u16 {
    let bits = v.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x7f_ffff;
    if exp == 0xff {
        return sign | 0x7c00 | if mant != 0 { 0x200 } else { 0 };
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    let (mut result, rem, half) = if e <= 0 {
        let shift = (14 - e) as u32;
        if shift > 24 {
            return sign;
        }
        let m = mant | 0x80_0000;
        (m >> shift, m & ((1 << shift) - 1), 1u32 << (shift - 1))
    } else {
        (((e as u32) << 10) | (mant >> 13), mant & 0x1fff, 0x1000)
    };
    // Round to nearest even; a carry may bump the exponent up to infinity.
    if rem > half || (rem == half && result & 1 == 1) {
        result += 1;
    }
    sign | result as u16
}

fn float_value(bits: u128, width: u32, opcode: Opcode) -> InterpResult<f64> {
    match width {
        16 => Ok(f64::from(half_to_f32(bits as u16))),
        32 => Ok(f64::from(f32::from_bits(bits as u32))),
        64 => Ok(f64::from_bits(bits as u64)),
        _ => Err(malformed(opcode, format!("no {width}-bit floating point format"))),
    }
}

fn float_bits(value: f64, width: u32, opcode: Opcode) -> InterpResult<u128> {
    match width {
        16 => Ok(u128::from(f32_to_half(value as f32))),
        32 => Ok(u128::from((value as f32).to_bits())),
        64 => Ok(u128::from(value.to_bits())),
        _ => Err(malformed(opcode, format!("no {width}-bit floating point format"))),
    }
}

fn fcmp(code: i64, a: f64, b: f64) -> Option<bool> {
    let unordered = a.is_nan() || b.is_nan();
    Some(match code {
        0 => false,
        1 => !unordered && a == b,
        2 => !unordered && a > b,
        3 => !unordered && a >= b,
        4 => !unordered && a < b,
        5 => !unordered && a <= b,
        6 => !unordered && a != b,
        7 => !unordered,
        8 => unordered,
        9 => unordered || a == b,
        10 => unordered || a > b,
        11 => unordered || a >= b,
        12 => unordered || a < b,
        13 => unordered || a <= b,
        14 => unordered || a != b,
        15 => true,
        _ => return None,
    })
}

fn icmp(code: i64, a: u128, b: u128, bits: u32) -> Option<bool> {
    let (sa, sb) = (sext(a, bits), sext(b, bits));
    Some(match code {
        32 => a == b,
        33 => a != b,
        34 => a > b,
        35 => a >= b,
        36 => a < b,
        37 => a <= b,
        38 => sa > sb,
        39 => sa >= sb,
        40 => sa < sb,
        41 => sa <= sb,
        _ => return None,
    })
}

fn malformed(opcode: Opcode, reason: impl Into<String>) -> InterpError {
    InterpError::Malformed { opcode: opcode.name().to_string(), reason: reason.into() }
}

fn unsupported(opcode: Opcode) -> InterpError {
    InterpError::Unsupported { opcode: opcode.name().to_string() }
}

struct Interpreter<'a, 'e> {
    mf: &'a MachineFunction,
    env: &'e mut dyn InterpEnv,
    frame: Frame,
}

impl Interpreter<'_, '_> {
    fn value(&self, value: ValueId) -> InterpResult<&[u128]> {
        self.frame
            .get(value)
            .ok_or_else(|| InterpError::UndefinedValue { value: self.mf.display_value(value) })
    }

    fn lane(&self, value: ValueId, lane: usize) -> InterpResult<u128> {
        let lanes = self.value(value)?;
        Ok(if lanes.len() == 1 { lanes[0] } else { lanes.get(lane).copied().unwrap_or(0) })
    }

    fn flat(&self, value: ValueId) -> InterpResult<Vec<bool>> {
        let ty = self.mf.value_type(value);
        Ok(pack(self.value(value)?, ty.scalar_size_in_bits()))
    }

    fn define(&mut self, value: ValueId, lanes: Vec<u128>) {
        let bits = self.mf.value_type(value).scalar_size_in_bits();
        self.frame.values.insert(value, lanes.into_iter().map(|l| l & mask(bits)).collect());
    }

    fn use_at(&self, inst: &MachineInst, i: usize) -> InterpResult<ValueId> {
        inst.uses
            .get(i)
            .copied()
            .ok_or_else(|| malformed(inst.opcode, format!("missing use {i}")))
    }

    fn def_at(&self, inst: &MachineInst, i: usize) -> InterpResult<ValueId> {
        inst.defs
            .get(i)
            .copied()
            .ok_or_else(|| malformed(inst.opcode, format!("missing def {i}")))
    }

    fn imm_at(&self, inst: &MachineInst, i: usize) -> InterpResult<i64> {
        inst.imms
            .get(i)
            .copied()
            .ok_or_else(|| malformed(inst.opcode, format!("missing immediate {i}")))
    }

    fn mem(&self, inst: &MachineInst) -> InterpResult<MemDesc> {
        inst.mem
            .first()
            .copied()
            .ok_or_else(|| malformed(inst.opcode, "missing memory operand"))
    }

    /// Address space and address of a pointer operand.
    fn address(&self, inst: &MachineInst, i: usize) -> InterpResult<(u32, u64)> {
        let ptr = self.use_at(inst, i)?;
        let ty = self.mf.value_type(ptr);
        let addr_space = match ty {
            LowLevelType::Pointer { addr_space, .. } => addr_space,
            _ => return Err(malformed(inst.opcode, format!("address of type {ty}"))),
        };
        Ok((addr_space, self.lane(ptr, 0)? as u64))
    }

    /// Compute a lane-wise result for the first def from per-lane use values.
    fn map_lanes(
        &mut self,
        inst: &MachineInst,
        mut f: impl FnMut(&[u128], u32, u32) -> InterpResult<u128>,
    ) -> InterpResult<()> {
        let def = self.def_at(inst, 0)?;
        let def_ty = self.mf.value_type(def);
        let src_bits = match inst.uses.first() {
            Some(&u) => self.mf.value_type(u).scalar_size_in_bits(),
            None => def_ty.scalar_size_in_bits(),
        };
        let mut lanes = Vec::with_capacity(def_ty.num_elements() as usize);
        for lane in 0..def_ty.num_elements() as usize {
            let operands = inst
                .uses
                .iter()
                .map(|&u| self.lane(u, lane))
                .collect::<InterpResult<Vec<_>>>()?;
            lanes.push(f(&operands, src_bits, def_ty.scalar_size_in_bits())?);
        }
        self.define(def, lanes);
        Ok(())
    }

    fn float_lanes(&mut self, inst: &MachineInst, f: impl Fn(&[f64]) -> f64) -> InterpResult<()> {
        let opcode = inst.opcode;
        self.map_lanes(inst, |ops, src_bits, dst_bits| {
            let values = ops
                .iter()
                .map(|&bits| float_value(bits, src_bits, opcode))
                .collect::<InterpResult<Vec<_>>>()?;
            float_bits(f(&values), dst_bits, opcode)
        })
    }

    fn execute(&mut self, inst: &MachineInst) -> InterpResult<()> {
        use Opcode::*;
        trace!("interpreting {}", inst.opcode);
        for &def in &inst.defs {
            check_width(self.mf.value_type(def))?;
        }

        let opcode = inst.opcode;
        match opcode {
            Constant => {
                let imm = self.imm_at(inst, 0)?;
                let def = self.def_at(inst, 0)?;
                let lanes = self.mf.value_type(def).num_elements() as usize;
                self.define(def, vec![imm as i128 as u128; lanes]);
            }
            Fconstant => {
                let imm = self.imm_at(inst, 0)?;
                let def = self.def_at(inst, 0)?;
                let lanes = self.mf.value_type(def).num_elements() as usize;
                self.define(def, vec![imm as u64 as u128; lanes]);
            }
            ImplicitDef => {
                let def = self.def_at(inst, 0)?;
                let lanes = self.mf.value_type(def).num_elements() as usize;
                self.define(def, vec![0; lanes]);
            }

            Add | Sub | Mul | And | Or | Xor => self.map_lanes(inst, |ops, _, _| {
                let (a, b) = (ops[0], ops[1]);
                Ok(match opcode {
                    Add => a.wrapping_add(b),
                    Sub => a.wrapping_sub(b),
                    Mul => a.wrapping_mul(b),
                    And => a & b,
                    Or => a | b,
                    _ => a ^ b,
                })
            })?,
            Umulh | Smulh => self.map_lanes(inst, |ops, bits, _| {
                if bits > 64 {
                    return Err(InterpError::TooWide { ty: format!("s{bits}") });
                }
                Ok(if opcode == Umulh {
                    (ops[0] * ops[1]) >> bits
                } else {
                    (sext(ops[0], bits).wrapping_mul(sext(ops[1], bits)) >> bits) as u128
                })
            })?,
            Shl | Lshr | Ashr => self.map_lanes(inst, |ops, bits, _| {
                let (value, amount) = (ops[0], ops[1]);
                if amount >= u128::from(bits) {
                    return Ok(if opcode == Ashr && sext(value, bits) < 0 { u128::MAX } else { 0 });
                }
                let amount = amount as u32;
                Ok(match opcode {
                    Shl => value << amount,
                    Lshr => value >> amount,
                    _ => (sext(value, bits) >> amount) as u128,
                })
            })?,
            Bswap => self.map_lanes(inst, |ops, bits, _| {
                if bits % 8 != 0 {
                    return Err(malformed(opcode, "byte swap of a partial byte"));
                }
                Ok(ops[0].swap_bytes() >> (128 - bits))
            })?,
            Ctlz | CtlzZeroUndef => self.map_lanes(inst, |ops, bits, _| {
                Ok(u128::from(ops[0].leading_zeros() - (128 - bits)))
            })?,
            Cttz | CttzZeroUndef => self.map_lanes(inst, |ops, bits, _| {
                Ok(u128::from(ops[0].trailing_zeros().min(bits)))
            })?,
            Ctpop => self.map_lanes(inst, |ops, _, _| Ok(u128::from(ops[0].count_ones())))?,

            Uaddo | Saddo | Usubo | Ssubo | Uadde | Sadde | Usube | Ssube => self.carry_op(inst)?,

            Sext => self.map_lanes(inst, |ops, bits, _| Ok(sext(ops[0], bits) as u128))?,
            Zext | Anyext | Trunc | Ptrtoint | Inttoptr => self.map_lanes(inst, |ops, _, _| Ok(ops[0]))?,
            Gep => self.map_lanes(inst, |ops, _, _| Ok(ops[0].wrapping_add(ops[1])))?,

            Icmp => {
                let code = self.imm_at(inst, 0)?;
                self.map_lanes(inst, |ops, bits, _| {
                    icmp(code, ops[0], ops[1], bits)
                        .map(u128::from)
                        .ok_or_else(|| malformed(opcode, format!("unknown predicate {code}")))
                })?
            }
            Fcmp => {
                let code = self.imm_at(inst, 0)?;
                self.map_lanes(inst, |ops, bits, _| {
                    let a = float_value(ops[0], bits, opcode)?;
                    let b = float_value(ops[1], bits, opcode)?;
                    fcmp(code, a, b)
                        .map(u128::from)
                        .ok_or_else(|| malformed(opcode, format!("unknown predicate {code}")))
                })?
            }
            Select => {
                let cond = self.use_at(inst, 0)?;
                let (t, f) = (self.use_at(inst, 1)?, self.use_at(inst, 2)?);
                let def = self.def_at(inst, 0)?;
                let lanes = (0..self.mf.value_type(def).num_elements() as usize)
                    .map(|lane| {
                        let pick = if self.lane(cond, lane)? & 1 == 1 { t } else { f };
                        self.lane(pick, lane)
                    })
                    .collect::<InterpResult<Vec<_>>>()?;
                self.define(def, lanes);
            }

            Fadd => self.float_lanes(inst, |v| v[0] + v[1])?,
            Fsub => self.float_lanes(inst, |v| v[0] - v[1])?,
            Fmul => self.float_lanes(inst, |v| v[0] * v[1])?,
            Fma => self.float_lanes(inst, |v| v[0].mul_add(v[1], v[2]))?,
            Fneg => self.map_lanes(inst, |ops, bits, _| Ok(ops[0] ^ (1u128 << (bits - 1))))?,
            Fabs => self.map_lanes(inst, |ops, bits, _| Ok(ops[0] & mask(bits - 1)))?,
            Fcanonicalize | Fpext | Fptrunc => self.float_lanes(inst, |v| v[0])?,
            Fsqrt => self.float_lanes(inst, |v| v[0].sqrt())?,
            Fpow => self.float_lanes(inst, |v| v[0].powf(v[1]))?,
            Fexp => self.float_lanes(inst, |v| v[0].exp())?,
            Fexp2 => self.float_lanes(inst, |v| v[0].exp2())?,
            Flog => self.float_lanes(inst, |v| v[0].ln())?,
            Flog2 => self.float_lanes(inst, |v| v[0].log2())?,
            Flog10 => self.float_lanes(inst, |v| v[0].log10())?,
            IntrinsicTrunc => self.float_lanes(inst, |v| v[0].trunc())?,
            IntrinsicRound => self.float_lanes(inst, |v| v[0].round())?,
            Sitofp | Uitofp => self.map_lanes(inst, |ops, bits, dst_bits| {
                let value = if opcode == Sitofp { sext(ops[0], bits) as f64 } else { ops[0] as f64 };
                float_bits(value, dst_bits, opcode)
            })?,
            Fptosi | Fptoui => self.map_lanes(inst, |ops, bits, _| {
                let value = float_value(ops[0], bits, opcode)?;
                Ok(if opcode == Fptosi { value as i128 as u128 } else { value as u128 })
            })?,

            Bitcast => {
                let bits = self.flat(self.use_at(inst, 0)?)?;
                let def = self.def_at(inst, 0)?;
                let lanes = unpack(&bits, self.mf.value_type(def));
                self.define(def, lanes);
            }
            MergeValues | ConcatVectors => {
                let mut bits = Vec::new();
                for &u in &inst.uses {
                    bits.extend(self.flat(u)?);
                }
                let def = self.def_at(inst, 0)?;
                let lanes = unpack(&bits, self.mf.value_type(def));
                self.define(def, lanes);
            }
            BuildVector => {
                let lanes = inst
                    .uses
                    .iter()
                    .map(|&u| self.lane(u, 0))
                    .collect::<InterpResult<Vec<_>>>()?;
                self.define(self.def_at(inst, 0)?, lanes);
            }
            UnmergeValues => {
                let bits = self.flat(self.use_at(inst, 0)?)?;
                let mut offset = 0;
                for &def in &inst.defs {
                    let ty = self.mf.value_type(def);
                    let size = ty.size_in_bits() as usize;
                    let piece = bits.get(offset..offset + size).unwrap_or(&[]);
                    let lanes = unpack(piece, ty);
                    self.define(def, lanes);
                    offset += size;
                }
            }
            Extract => {
                let bits = self.flat(self.use_at(inst, 0)?)?;
                let offset = usize::try_from(self.imm_at(inst, 0)?)
                    .map_err(|_| malformed(opcode, "negative offset"))?;
                let def = self.def_at(inst, 0)?;
                let ty = self.mf.value_type(def);
                let piece = bits.get(offset..offset + ty.size_in_bits() as usize).unwrap_or(&[]);
                let lanes = unpack(piece, ty);
                self.define(def, lanes);
            }
            Insert => {
                let mut bits = self.flat(self.use_at(inst, 0)?)?;
                let value = self.flat(self.use_at(inst, 1)?)?;
                let offset = usize::try_from(self.imm_at(inst, 0)?)
                    .map_err(|_| malformed(opcode, "negative offset"))?;
                for (i, bit) in value.into_iter().enumerate() {
                    if let Some(slot) = bits.get_mut(offset + i) {
                        *slot = bit;
                    }
                }
                let def = self.def_at(inst, 0)?;
                let lanes = unpack(&bits, self.mf.value_type(def));
                self.define(def, lanes);
            }
            ExtractVectorElt => {
                let vec = self.value(self.use_at(inst, 0)?)?.to_vec();
                let index = self.lane(self.use_at(inst, 1)?, 0)? as usize;
                self.define(self.def_at(inst, 0)?, vec![vec.get(index).copied().unwrap_or(0)]);
            }
            InsertVectorElt => {
                let mut vec = self.value(self.use_at(inst, 0)?)?.to_vec();
                let elt = self.lane(self.use_at(inst, 1)?, 0)?;
                let index = self.lane(self.use_at(inst, 2)?, 0)? as usize;
                if let Some(slot) = vec.get_mut(index) {
                    *slot = elt;
                }
                self.define(self.def_at(inst, 0)?, vec);
            }

            Load | Sextload | Zextload => {
                let mem = self.mem(inst)?;
                let (addr_space, addr) = self.address(inst, 0)?;
                let data = self.env.load(addr_space, addr, mem.size_in_bits.div_ceil(8))?;
                let mut bits = from_bytes(&data);
                bits.truncate(mem.size_in_bits as usize);
                let def = self.def_at(inst, 0)?;
                let ty = self.mf.value_type(def);
                let fill = opcode == Sextload && bits.last().copied().unwrap_or(false);
                bits.resize(ty.size_in_bits() as usize, fill);
                let lanes = unpack(&bits, ty);
                self.define(def, lanes);
            }
            Store => {
                let mem = self.mem(inst)?;
                let bits = self.flat(self.use_at(inst, 0)?)?;
                let (addr_space, addr) = self.address(inst, 1)?;
                let mut data = to_bytes(&bits, mem.size_in_bits.div_ceil(8));
                let partial = mem.size_in_bits % 8;
                if partial != 0 {
                    // Bits past the access size within the last byte are preserved.
                    let last = data.len() - 1;
                    let keep = self
                        .env
                        .load(addr_space, addr.wrapping_add(last as u64), 1)
                        .map(|b| b[0])
                        .unwrap_or(0);
                    let low = (1u8 << partial) - 1;
                    data[last] = (data[last] & low) | (keep & !low);
                }
                self.env.store(addr_space, addr, &data)?;
            }
            AtomicrmwXchg | AtomicrmwAdd | AtomicrmwSub | AtomicrmwAnd | AtomicrmwOr
            | AtomicrmwXor | AtomicrmwMax | AtomicrmwMin | AtomicrmwUmax | AtomicrmwUmin
            | AtomicCmpxchg => self.atomic(inst)?,

            Target(target) => {
                let result = self.env.execute_target(target.name, &inst.imms)?;
                if let Some(&def) = inst.defs.first() {
                    self.define(def, vec![result]);
                }
            }

            AddrspaceCast | FrameIndex | BlockAddr | Brcond => return Err(unsupported(opcode)),
        }
        Ok(())
    }

    fn carry_op(&mut self, inst: &MachineInst) -> InterpResult<()> {
        use Opcode::*;
        let opcode = inst.opcode;
        let (lhs, rhs) = (self.use_at(inst, 0)?, self.use_at(inst, 1)?);
        let (res, carry) = (self.def_at(inst, 0)?, self.def_at(inst, 1)?);
        let bits = self.mf.value_type(res).scalar_size_in_bits();
        let carry_in = match opcode {
            Uadde | Sadde | Usube | Ssube => self.lane(self.use_at(inst, 2)?, 0)? & 1,
            _ => 0,
        };
        let (a, b) = (self.lane(lhs, 0)?, self.lane(rhs, 0)?);
        let subtract = matches!(opcode, Usubo | Ssubo | Usube | Ssube);
        let value = if subtract {
            a.wrapping_sub(b).wrapping_sub(carry_in)
        } else {
            a.wrapping_add(b).wrapping_add(carry_in)
        } & mask(bits);

        let overflow = match opcode {
            Uaddo | Uadde => {
                if bits >= 128 {
                    value < a || (carry_in == 1 && value == a)
                } else {
                    a + b + carry_in > mask(bits)
                }
            }
            Usubo | Usube => b.checked_add(carry_in).map_or(true, |rhs| rhs > a),
            _ => {
                let (sa, sb, sv) = (sext(a, bits), sext(b, bits), sext(value, bits));
                if subtract {
                    (sa < 0) != (sb < 0) && (sv < 0) != (sa < 0)
                } else {
                    (sa < 0) == (sb < 0) && (sv < 0) != (sa < 0)
                }
            }
        };
        self.define(res, vec![value]);
        self.define(carry, vec![u128::from(overflow)]);
        Ok(())
    }

    fn atomic(&mut self, inst: &MachineInst) -> InterpResult<()> {
        use Opcode::*;
        let opcode = inst.opcode;
        let mem = self.mem(inst)?;
        let (addr_space, addr) = self.address(inst, 0)?;
        let def = self.def_at(inst, 0)?;
        let bits = self.mf.value_type(def).scalar_size_in_bits();
        if bits != mem.size_in_bits || bits % 8 != 0 {
            return Err(malformed(opcode, "atomic access size must match the value"));
        }
        let bytes = bits / 8;
        let old = get_bits(&from_bytes(&self.env.load(addr_space, addr, bytes)?), 0, bits);
        let operand = self.lane(self.use_at(inst, 1)?, 0)?;
        let new = match opcode {
            AtomicrmwXchg => operand,
            AtomicrmwAdd => old.wrapping_add(operand),
            AtomicrmwSub => old.wrapping_sub(operand),
            AtomicrmwAnd => old & operand,
            AtomicrmwOr => old | operand,
            AtomicrmwXor => old ^ operand,
            AtomicrmwMax => if sext(old, bits) >= sext(operand, bits) { old } else { operand },
            AtomicrmwMin => if sext(old, bits) <= sext(operand, bits) { old } else { operand },
            AtomicrmwUmax => old.max(operand),
            AtomicrmwUmin => old.min(operand),
            _ => {
                let replacement = self.lane(self.use_at(inst, 2)?, 0)?;
                if old == operand { replacement } else { old }
            }
        };
        let data = to_bytes(&pack(&[new & mask(bits)], bits), bytes);
        self.env.store(addr_space, addr, &data)?;
        self.define(def, vec![old]);
        Ok(())
    }
}
