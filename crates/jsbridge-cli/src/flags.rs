//! Engine flags through `jsb_set_flags_from_command_line`.

use anyhow::{Context, Result};
use jsbridge_capi::jsb_set_flags_from_command_line;
use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;

pub struct EngineArgs {
    /// Arguments left after engine flags were removed, program name first.
    pub remaining: Vec<String>,
    /// The engine flags that were applied, in order.
    pub consumed: Vec<String>,
}

/// Apply the engine flags in `args` and strip them.
pub fn apply_from_command_line(args: &[String]) -> Result<EngineArgs> {
    let remaining = call(args, true)?;
    let consumed = removed(args, &remaining);
    Ok(EngineArgs {
        remaining,
        consumed,
    })
}

/// Apply `flags` as if they followed `program` on a command line.
pub fn apply(program: &str, flags: &[String]) -> Result<()> {
    let args: Vec<String> = std::iter::once(program.to_string())
        .chain(flags.iter().cloned())
        .collect();
    call(&args, false)?;
    Ok(())
}

fn call(args: &[String], remove_flags: bool) -> Result<Vec<String>> {
    let owned = args
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .context("argument contains a NUL byte")?;
    let mut argv: Vec<*mut c_char> = owned.iter().map(|arg| arg.as_ptr().cast_mut()).collect();
    argv.push(ptr::null_mut());
    let mut argc = c_int::try_from(owned.len()).context("too many arguments")?;

    // SAFETY: argv holds argc valid C strings plus a NULL terminator, all
    // alive until the end of this function. The call only reorders them.
    unsafe { jsb_set_flags_from_command_line(&mut argc, argv.as_mut_ptr(), remove_flags) };

    let count = usize::try_from(argc).unwrap_or(0);
    Ok(argv[..count]
        .iter()
        // SAFETY: entries still point into `owned`
        .map(|&arg| unsafe { CStr::from_ptr(arg) }.to_string_lossy().into_owned())
        .collect())
}

/// The entries of `original` missing from `remaining`, which keeps the
/// relative order of what it kept.
fn removed(original: &[String], remaining: &[String]) -> Vec<String> {
    let mut kept = remaining.iter().peekable();
    let mut consumed = Vec::new();
    for arg in original {
        if kept.peek() == Some(&arg) {
            kept.next();
        } else {
            consumed.push(arg.clone());
        }
    }
    consumed
}
