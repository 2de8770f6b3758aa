//! Dynamic test runner for MIR filetests.
//!
//! Discovers every .mir file under tests/mir, legalizes it for the subtarget
//! named on its RUN line and matches the printed result against its CHECK
//! lines.
//!
//! Directives:
//! - `; RUN: [not] --gen <si|ci|vi|gfx9> [--no-aperture-regs]`; `not` expects
//!   legalization to fail and matches the checks against the error message.
//! - `; CHECK: text` must occur after the previous match.
//! - `; CHECK-SAME: text` must occur on the line of the previous match.
//! - `; CHECK-NOT: text` must not occur anywhere.

use std::fs;
use std::path::{Path, PathBuf};

use bumpalo::Bump;
use gisel_legalize::amdgpu::{AmdgpuLegalizer, Generation, Subtarget};
use gisel_legalize::mir::parse_functions;
use gisel_legalize::{LegalizerSession, Legalizer};
use pretty_assertions::assert_eq;

/// Discovers all .mir files in a directory recursively
fn discover_mir_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(discover_mir_files(&path));
            } else if path.extension().and_then(|s| s.to_str()) == Some("mir") {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

#[derive(Debug)]
struct RunLine {
    subtarget: Subtarget,
    expect_failure: bool,
}

fn parse_run_line(content: &str) -> Result<RunLine, String> {
    let line = content
        .lines()
        .find_map(|l| l.strip_prefix("; RUN:"))
        .ok_or("missing RUN line")?;
    let mut words = line.split_whitespace().peekable();
    let expect_failure = words.next_if_eq(&"not").is_some();

    let mut generation = Generation::Gfx9;
    let mut aperture_regs = true;
    while let Some(word) = words.next() {
        match word {
            "--gen" => {
                let name = words.next().ok_or("--gen needs a value")?;
                generation = name.parse()?;
            }
            "--no-aperture-regs" => aperture_regs = false,
            other => return Err(format!("unknown RUN option '{other}'")),
        }
    }
    Ok(RunLine {
        subtarget: Subtarget::new(generation).with_aperture_regs(aperture_regs),
        expect_failure,
    })
}

/// Parse and legalize every function of the file.
fn run_mir_file(content: &str, run: &RunLine) -> Result<String, String> {
    let target = AmdgpuLegalizer::new(run.subtarget).map_err(|e| e.to_string())?;
    let functions = parse_functions(content, &run.subtarget).map_err(|e| e.to_string())?;
    let arena = Bump::new();
    let session = LegalizerSession::new(&arena);
    let legalizer = Legalizer::new(&target);

    let mut output = String::new();
    for mut mf in functions {
        legalizer.legalize_function(&session, &mut mf).map_err(|e| e.to_string())?;
        let printed = mf.to_string();

        // The printed form must parse back to the same instruction sequence.
        let reparsed = parse_functions(&printed, &run.subtarget).map_err(|e| format!("reparse: {e}"))?;
        let opcodes = |f: &gisel_legalize::MachineFunction| -> Vec<_> { f.instructions().map(|(_, i)| i.opcode).collect() };
        assert_eq!(reparsed.len(), 1);
        assert_eq!(opcodes(&reparsed[0]), opcodes(&mf));

        output.push_str(&printed);
    }
    Ok(output)
}

fn check_output(content: &str, output: &str) -> Result<(), String> {
    let mut pos = 0;
    let mut line_end = 0;
    for line in content.lines() {
        if let Some(pattern) = line.strip_prefix("; CHECK-NOT:") {
            let pattern = pattern.trim();
            if output.contains(pattern) {
                return Err(format!("CHECK-NOT '{pattern}' found"));
            }
        } else if let Some(pattern) = line.strip_prefix("; CHECK-SAME:") {
            let pattern = pattern.trim();
            match output[pos..line_end].find(pattern) {
                Some(found) => pos += found + pattern.len(),
                None => return Err(format!("CHECK-SAME '{pattern}' not found on the matched line")),
            }
        } else if let Some(pattern) = line.strip_prefix("; CHECK:") {
            let pattern = pattern.trim();
            match output[pos..].find(pattern) {
                Some(found) => {
                    pos += found + pattern.len();
                    line_end = output[pos..].find('\n').map_or(output.len(), |n| pos + n);
                }
                None => return Err(format!("CHECK '{pattern}' not found after offset {pos}")),
            }
        }
    }
    Ok(())
}

#[test]
fn run_all_mir_filetests() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("mir");
    let files = discover_mir_files(&dir);
    assert!(!files.is_empty(), "no .mir files under {}", dir.display());

    let mut failures = Vec::new();
    for path in &files {
        let content = fs::read_to_string(path).unwrap();
        let outcome = parse_run_line(&content).and_then(|run| {
            let output = match (run_mir_file(&content, &run), run.expect_failure) {
                (Ok(out), false) => out,
                (Err(err), true) => err,
                (Ok(out), true) => return Err(format!("expected failure, got:\n{out}")),
                (Err(err), false) => return Err(err),
            };
            check_output(&content, &output).map_err(|e| format!("{e}\n--- output ---\n{output}"))
        });
        if let Err(err) = outcome {
            failures.push(format!("{}: {err}", path.display()));
        }
    }

    assert!(failures.is_empty(), "{} of {} filetests failed:\n{}", failures.len(), files.len(), failures.join("\n\n"));
}

#[test]
fn test_check_matching_is_ordered() {
    let output = "a = G_ADD\nb = G_SUB\n";
    assert!(check_output("; CHECK: G_ADD\n; CHECK: G_SUB\n", output).is_ok());
    assert!(check_output("; CHECK: G_SUB\n; CHECK: G_ADD\n", output).is_err());
    assert!(check_output("; CHECK: a =\n; CHECK-SAME: G_ADD\n", output).is_ok());
    assert!(check_output("; CHECK: a =\n; CHECK-SAME: G_SUB\n", output).is_err());
    assert!(check_output("; CHECK-NOT: G_MUL\n", output).is_ok());
}
