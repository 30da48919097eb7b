//! Intrinsic implementations behind the FIP calling convention.
//!
//! A callee reads its arguments through the `*_argument` helpers, which
//! evaluate the call site's argument postfix slots and coerce the tagged
//! results (consuming temp references as a side effect). Results are
//! void, int, or a temp string slot.
//!
//! Intrinsic-level failures (a file that does not open, a bad file
//! descriptor) are reported to the script as falsy return values and
//! never unwind execution.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::clock::ClockSource;
use crate::intrinsics::Intrinsic;

use super::error::VmError;
use super::eval::{format_int, parse_int, Eval};
use super::Vm;

/// What an intrinsic produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IntrinsicValue {
    Void,
    Int(i32),
    /// Index of an active temp string slot.
    Str(usize),
}

/// A byte-array buffer argument, resolved to its arena.
#[derive(Debug, Clone, Copy)]
enum BufferRef {
    Local(usize),
    Global(usize),
}

#[derive(Debug)]
pub(crate) struct FileHandle {
    file: File,
    eof: bool,
}

impl FileHandle {
    fn read_byte(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        match self.file.read(&mut buf) {
            Ok(0) | Err(_) => {
                self.eof = true;
                None
            }
            Ok(_) => Some(buf[0]),
        }
    }

    fn read_some(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) | Err(_) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
            }
        }
        filled
    }
}

fn open_options(mode: &str) -> Option<OpenOptions> {
    let mut opts = OpenOptions::new();
    match mode {
        "r" => opts.read(true),
        "w" => opts.write(true).create(true).truncate(true),
        "a" => opts.append(true).create(true),
        "r+" => opts.read(true).write(true),
        "w+" => opts.read(true).write(true).create(true).truncate(true),
        "a+" => opts.read(true).append(true).create(true),
        _ => return None,
    };
    Some(opts)
}

fn bit_in_range(n: i32) -> bool {
    (0..32).contains(&n)
}

impl<C: ClockSource> Vm<C> {
    fn arg_slot(&self, fip: usize, i: usize) -> usize {
        self.program.fips[fip].argv[i]
    }

    fn int_argument(&mut self, fip: usize, i: usize) -> Result<i32, VmError> {
        let slot = self.arg_slot(fip, i);
        let value = self.eval_postfix(slot)?;
        self.int_value(value)
    }

    fn byte_argument(&mut self, fip: usize, i: usize) -> Result<u8, VmError> {
        Ok(self.int_argument(fip, i)? as u8)
    }

    fn string_argument(&mut self, fip: usize, i: usize) -> Result<Vec<u8>, VmError> {
        let slot = self.arg_slot(fip, i);
        let value = self.eval_postfix(slot)?;
        self.string_value(value)
    }

    fn byte_array_argument(&mut self, fip: usize, i: usize) -> Result<BufferRef, VmError> {
        let slot = self.arg_slot(fip, i);
        match self.eval_postfix(slot)? {
            Eval::LocalByteArrayRef(array) => Ok(BufferRef::Local(array)),
            Eval::GlobalByteArrayRef(array) => Ok(BufferRef::Global(array)),
            _ => Err(VmError::InvalidReference {
                what: "byte array argument",
                index: i,
            }),
        }
    }

    fn buffer_len(&self, buffer: BufferRef) -> Result<usize, VmError> {
        match buffer {
            BufferRef::Local(array) => self
                .current_frame()?
                .byte_arrays
                .get(array)
                .map(Vec::len)
                .ok_or(VmError::InvalidReference {
                    what: "local byte array",
                    index: array,
                }),
            BufferRef::Global(array) => self
                .global_byte_arrays
                .get(array)
                .map(Vec::len)
                .ok_or(VmError::InvalidReference {
                    what: "global byte array",
                    index: array,
                }),
        }
    }

    fn file_mut(&mut self, fd: i32) -> Option<&mut FileHandle> {
        if fd < 0 {
            return None;
        }
        self.files.get_mut(fd as usize).and_then(Option::as_mut)
    }

    fn print_args(&mut self, fip: usize, newline: bool) -> Result<(), VmError> {
        let argc = self.program.fips[fip].argv.len();
        for i in 0..argc {
            let slot = self.arg_slot(fip, i);
            let value = self.eval_postfix(slot)?;
            let bytes = match value {
                Eval::LocalByteArrayRef(array) => self
                    .current_frame()?
                    .byte_arrays
                    .get(array)
                    .ok_or(VmError::InvalidReference {
                        what: "local byte array",
                        index: array,
                    })?
                    .clone(),
                Eval::GlobalByteArrayRef(array) => self
                    .global_byte_arrays
                    .get(array)
                    .ok_or(VmError::InvalidReference {
                        what: "global byte array",
                        index: array,
                    })?
                    .clone(),
                other => self.string_value(other)?,
            };
            self.write_output(&bytes);
        }
        if newline {
            self.write_output(b"\n");
        }
        Ok(())
    }

    pub(crate) fn execute_intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        fip: usize,
    ) -> Result<IntrinsicValue, VmError> {
        use IntrinsicValue::{Int, Str, Void};

        match intrinsic {
            Intrinsic::Print => {
                self.print_args(fip, false)?;
                Ok(Void)
            }
            Intrinsic::Println => {
                self.print_args(fip, true)?;
                Ok(Void)
            }
            Intrinsic::Putc => {
                let c = self.int_argument(fip, 0)? as u8;
                self.write_output(&[c]);
                Ok(Void)
            }
            Intrinsic::Getc => {
                let mut buf = [0u8; 1];
                let n = std::io::stdin().lock().read(&mut buf).unwrap_or(0);
                Ok(Int(if n == 0 { -1 } else { i32::from(buf[0]) }))
            }

            Intrinsic::Length => {
                let s = self.string_argument(fip, 0)?;
                Ok(Int(s.len() as i32))
            }
            Intrinsic::Substr => {
                let s = self.string_argument(fip, 0)?;
                let start = self.int_argument(fip, 1)?.max(0) as usize;
                let len = self.int_argument(fip, 2)?.max(0) as usize;
                let start = start.min(s.len());
                let end = start.saturating_add(len).min(s.len());
                Ok(Str(self.temp.new_slot(&s[start..end])))
            }
            Intrinsic::Tokenize => {
                let s = self.string_argument(fip, 0)?;
                let delims = self.string_argument(fip, 1)?;
                let n = self.int_argument(fip, 2)?;
                let token = if n < 0 {
                    &[][..]
                } else {
                    s.split(|b| delims.contains(b))
                        .filter(|t| !t.is_empty())
                        .nth(n as usize)
                        .unwrap_or(&[])
                };
                Ok(Str(self.temp.new_slot(token)))
            }
            Intrinsic::CharAt => {
                let s = self.string_argument(fip, 0)?;
                let i = self.int_argument(fip, 1)?;
                let c = if i >= 0 {
                    s.get(i as usize).copied().unwrap_or(0)
                } else {
                    0
                };
                Ok(Int(i32::from(c)))
            }
            Intrinsic::CharStr => {
                let c = self.byte_argument(fip, 0)?;
                Ok(Str(self.temp.new_slot(&[c])))
            }
            Intrinsic::Atoi => {
                let s = self.string_argument(fip, 0)?;
                Ok(Int(parse_int(&s)))
            }
            Intrinsic::Itoa => {
                let v = self.int_argument(fip, 0)?;
                let bytes = format_int(v);
                Ok(Str(self.temp.new_slot(&bytes)))
            }

            Intrinsic::TimeStart => {
                self.stopwatch = self.clock.now_ms();
                Ok(Int(0))
            }
            Intrinsic::TimeStop => {
                let elapsed = self.clock.now_ms().saturating_sub(self.stopwatch);
                Ok(Int(elapsed as i32))
            }
            Intrinsic::Millis => Ok(Int(self.clock.now_ms() as i32)),
            Intrinsic::Delay => {
                let ms = self.int_argument(fip, 0)?.max(0) as u32;
                self.clock.sleep_ms(ms);
                self.poll_alarms()?;
                Ok(Void)
            }
            Intrinsic::AlarmSet => {
                let period = self.int_argument(fip, 0)?.max(0) as u32;
                let callback = if self.program.fips[fip].argv.len() == 2 {
                    Some(self.int_argument(fip, 1)?.max(0) as usize)
                } else {
                    None
                };
                let now = self.clock.now_ms();
                let slot = self.alarms.set(now, period, callback);
                Ok(Int(slot.map(|s| s as i32).unwrap_or(-1)))
            }
            Intrinsic::AlarmCheck => {
                let slot = self.int_argument(fip, 0)?;
                let now = self.clock.now_ms();
                Ok(Int(i32::from(self.alarms.check(now, slot))))
            }
            Intrinsic::AlarmResetAll => {
                self.alarms.reset_all();
                Ok(Void)
            }

            Intrinsic::BitSet => {
                let v = self.int_argument(fip, 0)?;
                let n = self.int_argument(fip, 1)?;
                Ok(Int(if bit_in_range(n) { v | (1 << n) } else { v }))
            }
            Intrinsic::BitReset => {
                let v = self.int_argument(fip, 0)?;
                let n = self.int_argument(fip, 1)?;
                Ok(Int(if bit_in_range(n) { v & !(1 << n) } else { v }))
            }
            Intrinsic::BitToggle => {
                let v = self.int_argument(fip, 0)?;
                let n = self.int_argument(fip, 1)?;
                Ok(Int(if bit_in_range(n) { v ^ (1 << n) } else { v }))
            }
            Intrinsic::BitTest => {
                let v = self.int_argument(fip, 0)?;
                let n = self.int_argument(fip, 1)?;
                Ok(Int(if bit_in_range(n) {
                    ((v as u32) >> n) as i32 & 1
                } else {
                    0
                }))
            }
            Intrinsic::BitmaskGet => {
                let v = self.int_argument(fip, 0)?;
                let mask = self.int_argument(fip, 1)?;
                let shift = self.int_argument(fip, 2)?;
                Ok(Int(if bit_in_range(shift) {
                    (((v as u32) >> shift) as i32) & mask
                } else {
                    0
                }))
            }
            Intrinsic::BitmaskSet => {
                let v = self.int_argument(fip, 0)?;
                let mask = self.int_argument(fip, 1)?;
                let shift = self.int_argument(fip, 2)?;
                let field = self.int_argument(fip, 3)?;
                Ok(Int(if bit_in_range(shift) {
                    (v & !(mask << shift)) | ((field & mask) << shift)
                } else {
                    v
                }))
            }

            Intrinsic::FileOpen => {
                let path = self.string_argument(fip, 0)?;
                let mode = self.string_argument(fip, 1)?;
                let mode = String::from_utf8_lossy(&mode).into_owned();
                let path = String::from_utf8_lossy(&path).into_owned();
                let Some(opts) = open_options(&mode) else {
                    return Ok(Int(-1));
                };
                match opts.open(&path) {
                    Ok(file) => {
                        let handle = FileHandle { file, eof: false };
                        let fd = match self.files.iter().position(Option::is_none) {
                            Some(i) => {
                                self.files[i] = Some(handle);
                                i
                            }
                            None => {
                                self.files.push(Some(handle));
                                self.files.len() - 1
                            }
                        };
                        Ok(Int(fd as i32))
                    }
                    Err(_) => Ok(Int(-1)),
                }
            }
            Intrinsic::FileClose => {
                let fd = self.int_argument(fip, 0)?;
                if fd >= 0 && (fd as usize) < self.files.len() && self.files[fd as usize].is_some()
                {
                    self.files[fd as usize] = None;
                    Ok(Int(0))
                } else {
                    Ok(Int(-1))
                }
            }
            Intrinsic::FileGetc => {
                let fd = self.int_argument(fip, 0)?;
                Ok(Int(match self.file_mut(fd).and_then(FileHandle::read_byte) {
                    Some(b) => i32::from(b),
                    None => -1,
                }))
            }
            Intrinsic::FilePutc => {
                let fd = self.int_argument(fip, 0)?;
                let c = self.byte_argument(fip, 1)?;
                Ok(Int(match self.file_mut(fd) {
                    Some(h) => {
                        if h.file.write_all(&[c]).is_ok() {
                            0
                        } else {
                            -1
                        }
                    }
                    None => -1,
                }))
            }
            Intrinsic::FileReadLn => {
                let fd = self.int_argument(fip, 0)?;
                let mut line = Vec::new();
                if let Some(handle) = self.file_mut(fd) {
                    while let Some(b) = handle.read_byte() {
                        if b == b'\n' {
                            break;
                        }
                        line.push(b);
                    }
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                Ok(Str(self.temp.new_slot(&line)))
            }
            Intrinsic::FileWrite => {
                let fd = self.int_argument(fip, 0)?;
                let s = self.string_argument(fip, 1)?;
                Ok(Int(match self.file_mut(fd) {
                    Some(h) => {
                        if h.file.write_all(&s).is_ok() {
                            s.len() as i32
                        } else {
                            -1
                        }
                    }
                    None => -1,
                }))
            }
            Intrinsic::FileWriteLn => {
                let fd = self.int_argument(fip, 0)?;
                let s = self.string_argument(fip, 1)?;
                Ok(Int(match self.file_mut(fd) {
                    Some(h) => {
                        if h.file.write_all(&s).is_ok() && h.file.write_all(b"\n").is_ok() {
                            s.len() as i32 + 1
                        } else {
                            -1
                        }
                    }
                    None => -1,
                }))
            }
            Intrinsic::FileEof => {
                let fd = self.int_argument(fip, 0)?;
                Ok(Int(match self.file_mut(fd) {
                    Some(h) => i32::from(h.eof),
                    None => 1,
                }))
            }
            Intrinsic::FileTell => {
                let fd = self.int_argument(fip, 0)?;
                Ok(Int(match self.file_mut(fd) {
                    Some(h) => h.file.stream_position().map(|p| p as i32).unwrap_or(-1),
                    None => -1,
                }))
            }
            Intrinsic::FileSeek => {
                let fd = self.int_argument(fip, 0)?;
                let pos = self.int_argument(fip, 1)?.max(0) as u64;
                Ok(Int(match self.file_mut(fd) {
                    Some(h) => {
                        if h.file.seek(SeekFrom::Start(pos)).is_ok() {
                            h.eof = false;
                            0
                        } else {
                            -1
                        }
                    }
                    None => -1,
                }))
            }
            Intrinsic::FileRead => {
                let fd = self.int_argument(fip, 0)?;
                let buffer = self.byte_array_argument(fip, 1)?;
                let n = self.int_argument(fip, 2)?.max(0) as usize;
                let want = n.min(self.buffer_len(buffer)?);
                let mut scratch = vec![0u8; want];
                let got = match self.file_mut(fd) {
                    Some(h) => h.read_some(&mut scratch),
                    None => return Ok(Int(-1)),
                };
                match buffer {
                    BufferRef::Local(array) => {
                        let frame = self.current_frame_mut()?;
                        frame.byte_arrays[array][..got].copy_from_slice(&scratch[..got]);
                    }
                    BufferRef::Global(array) => {
                        self.global_byte_arrays[array][..got].copy_from_slice(&scratch[..got]);
                    }
                }
                Ok(Int(got as i32))
            }
        }
    }
}
