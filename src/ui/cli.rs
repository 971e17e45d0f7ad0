//! Line-oriented CLI for the debugger, with history via [dialoguer].
//!
//! Commands follow the usual small-debugger surface: `cont`, `break`,
//! `step`/`next`/`finish`/`stepi`, `register`, `memory`, `variables`,
//! `backtrace`, `symbol`, `quit`.

use std::str::FromStr;

use dialoguer::BasicHistory;
use tracing::{error, info, trace, warn};

use super::{BreakpointSpec, DebuggerUI, Status};
use crate::addr::Addr;
use crate::errors::Result;
use crate::feedback::Feedback;
use crate::regs::Register;
use crate::Word;

pub struct CliUi {
    buf: String,
    buf_preparsed: Vec<String>,
    history: BasicHistory,
}

impl CliUi {
    pub fn build() -> Result<Self> {
        Ok(CliUi {
            buf_preparsed: Vec::new(),
            buf: String::new(),
            history: BasicHistory::new(),
        })
    }

    fn get_input(&mut self) -> Result<()> {
        self.buf = dialoguer::Input::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .history_with(&mut self.history)
            .interact_text()?;
        trace!("processing '{}'", self.buf);
        self.buf_preparsed = self.buf.split_whitespace().map(str::to_string).collect();
        Ok(())
    }
}

impl DebuggerUI for CliUi {
    fn process(&mut self, feedback: &Feedback) -> Result<Status> {
        if let Feedback::Error(e) = feedback {
            warn!("{e}");
        } else {
            info!("{feedback}");
        }

        loop {
            self.get_input()?;
            if self.buf_preparsed.is_empty() {
                continue;
            }

            let args = &self.buf_preparsed;
            match args[0].as_str() {
                "cont" | "c" => return Ok(Status::Continue),
                "quit" | "q" => return Ok(Status::DebuggerQuit),
                "step" | "s" => return Ok(Status::StepIn),
                "next" | "n" => return Ok(Status::StepOver),
                "finish" | "f" => return Ok(Status::StepOut),
                "stepi" | "si" => return Ok(Status::StepSingle),
                "variables" | "vars" => return Ok(Status::Variables),
                "backtrace" | "bt" => return Ok(Status::Backtrace),
                "break" | "b" => {
                    if args.len() < 2 {
                        error!("break (0xADDR | FILE:LINE | FUNCTION)");
                        continue;
                    }
                    let spec = &args[1];
                    if let Some(raw) = spec.strip_prefix("0x") {
                        match u64::from_str_radix(raw, 16) {
                            Ok(addr) => {
                                return Ok(Status::SetBreakpoint(BreakpointSpec::Address(
                                    Addr::from(addr),
                                )))
                            }
                            Err(e) => {
                                error!("bad address: {e}");
                                continue;
                            }
                        }
                    } else if let Some((file, line)) = spec.rsplit_once(':') {
                        match line.parse::<u64>() {
                            Ok(line) => {
                                return Ok(Status::SetBreakpoint(BreakpointSpec::SourceLine(
                                    file.to_string(),
                                    line,
                                )))
                            }
                            Err(e) => {
                                error!("bad line number: {e}");
                                continue;
                            }
                        }
                    }
                    return Ok(Status::SetBreakpoint(BreakpointSpec::Function(
                        spec.to_string(),
                    )));
                }
                "delbreak" | "db" => {
                    if args.len() < 2 {
                        error!("delbreak 0xADDR");
                        continue;
                    }
                    let addr = Addr::from(get_number(&args[1])? as usize);
                    return Ok(Status::DelBreakpoint(addr));
                }
                "register" | "regs" => {
                    if args.len() < 2 {
                        error!("register (dump | read NAME | write NAME 0xVAL)");
                        continue;
                    }
                    match args[1].as_str() {
                        "dump" => return Ok(Status::DumpRegisters),
                        "read" if args.len() >= 3 => match Register::from_str(&args[2]) {
                            Ok(reg) => return Ok(Status::ReadRegister(reg)),
                            Err(e) => {
                                error!("{e}");
                                continue;
                            }
                        },
                        "write" if args.len() >= 4 => match Register::from_str(&args[2]) {
                            Ok(reg) => {
                                let value = get_number(&args[3])?;
                                return Ok(Status::SetRegister(reg, value));
                            }
                            Err(e) => {
                                error!("{e}");
                                continue;
                            }
                        },
                        _ => {
                            error!("register (dump | read NAME | write NAME 0xVAL)");
                            continue;
                        }
                    }
                }
                "memory" | "mem" => {
                    if args.len() < 3 {
                        error!("memory (read 0xADDR | write 0xADDR 0xVAL)");
                        continue;
                    }
                    let addr = Addr::from(get_number(&args[2])? as usize);
                    match args[1].as_str() {
                        "read" => return Ok(Status::ReadMem(addr)),
                        "write" if args.len() >= 4 => {
                            let value = get_number(&args[3])? as Word;
                            return Ok(Status::WriteMem(addr, value));
                        }
                        _ => {
                            error!("memory (read 0xADDR | write 0xADDR 0xVAL)");
                            continue;
                        }
                    }
                }
                "symbol" | "sym" => {
                    if args.len() < 2 {
                        error!("symbol NAME");
                        continue;
                    }
                    return Ok(Status::LookupSymbol(args[1].clone()));
                }
                other => {
                    error!("unknown command '{other}'");
                }
            }
        }
    }
}

/// Parses a hex number with or without the `0x` prefix.
fn get_number(mut raw: &str) -> Result<u64> {
    if let Some(stripped) = raw.strip_prefix("0x") {
        raw = stripped;
    }
    Ok(u64::from_str_radix(raw, 16)?)
}

#[cfg(test)]
mod test {
    use super::get_number;

    #[test]
    fn test_get_number() {
        assert_eq!(0x19u64, get_number("19").unwrap());
        assert_eq!(0x19u64, get_number("0x19").unwrap());
        assert_eq!(0x19u64, get_number("0x00019").unwrap());
        assert_eq!(0xdead_beefu64, get_number("0xdeadbeef").unwrap());
        assert!(get_number("zz").is_err());
    }
}
