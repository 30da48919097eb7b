//! Built-in ("intern") function table.
//!
//! The compiler refers to intrinsics by dense index; the table below
//! fixes the numbering. Indices are stable: new intrinsics are appended,
//! never inserted. Hardware-bound families (display, GPIO, I²C, …) live
//! behind the same contract in embedded builds and are simply absent
//! here; a script calling an unknown index fails with a fatal error.
//!
//! Every intrinsic follows the FIP calling convention: it reads its
//! arguments by evaluating the call site's argument postfix slots and
//! reports its result as void, int, or a temp string slot.

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    // console
    Print,
    Println,
    Putc,
    Getc,
    // strings
    Length,
    Substr,
    Tokenize,
    CharAt,
    CharStr,
    Atoi,
    Itoa,
    // time and alarms
    TimeStart,
    TimeStop,
    Millis,
    Delay,
    AlarmSet,
    AlarmCheck,
    AlarmResetAll,
    // bits and bitmasks
    BitSet,
    BitReset,
    BitToggle,
    BitTest,
    BitmaskGet,
    BitmaskSet,
    // file I/O
    FileOpen,
    FileClose,
    FileGetc,
    FilePutc,
    FileReadLn,
    FileWrite,
    FileWriteLn,
    FileEof,
    FileTell,
    FileSeek,
    FileRead,
}

/// One table entry: the intrinsic, its script-visible name, and the
/// argument counts it accepts.
#[derive(Debug, Clone, Copy)]
pub struct IntrinsicDesc {
    pub intrinsic: Intrinsic,
    pub name: &'static str,
    pub min_argc: usize,
    pub max_argc: usize,
}

const fn desc(
    intrinsic: Intrinsic,
    name: &'static str,
    min_argc: usize,
    max_argc: usize,
) -> IntrinsicDesc {
    IntrinsicDesc {
        intrinsic,
        name,
        min_argc,
        max_argc,
    }
}

/// The dispatch table, ordered by intrinsic index.
pub static TABLE: Lazy<Vec<IntrinsicDesc>> = Lazy::new(|| {
    use Intrinsic::*;
    vec![
        desc(Print, "print", 0, 16),
        desc(Println, "println", 0, 16),
        desc(Putc, "putc", 1, 1),
        desc(Getc, "getc", 0, 0),
        desc(Length, "length", 1, 1),
        desc(Substr, "substr", 3, 3),
        desc(Tokenize, "tokenize", 3, 3),
        desc(CharAt, "charat", 2, 2),
        desc(CharStr, "charstr", 1, 1),
        desc(Atoi, "atoi", 1, 1),
        desc(Itoa, "itoa", 1, 1),
        desc(TimeStart, "time_start", 0, 0),
        desc(TimeStop, "time_stop", 0, 0),
        desc(Millis, "millis", 0, 0),
        desc(Delay, "delay", 1, 1),
        desc(AlarmSet, "alarm_set", 1, 2),
        desc(AlarmCheck, "alarm_check", 1, 1),
        desc(AlarmResetAll, "alarm_reset_all", 0, 0),
        desc(BitSet, "bit_set", 2, 2),
        desc(BitReset, "bit_reset", 2, 2),
        desc(BitToggle, "bit_toggle", 2, 2),
        desc(BitTest, "bit_test", 2, 2),
        desc(BitmaskGet, "bitmask_get", 3, 3),
        desc(BitmaskSet, "bitmask_set", 4, 4),
        desc(FileOpen, "fopen", 2, 2),
        desc(FileClose, "fclose", 1, 1),
        desc(FileGetc, "fgetc", 1, 1),
        desc(FilePutc, "fputc", 2, 2),
        desc(FileReadLn, "freadln", 1, 1),
        desc(FileWrite, "fwrite", 2, 2),
        desc(FileWriteLn, "fwriteln", 2, 2),
        desc(FileEof, "feof", 1, 1),
        desc(FileTell, "ftell", 1, 1),
        desc(FileSeek, "fseek", 2, 2),
        desc(FileRead, "fread", 3, 3),
    ]
});

/// Look up an intrinsic by its dense index.
pub fn lookup(index: usize) -> Option<&'static IntrinsicDesc> {
    TABLE.get(index)
}

/// Inverse lookup by script-visible name.
pub fn index_of(name: &str) -> Option<usize> {
    TABLE.iter().position(|d| d.name == name)
}

impl Intrinsic {
    pub fn name(self) -> &'static str {
        TABLE
            .iter()
            .find(|d| d.intrinsic == self)
            .map(|d| d.name)
            .unwrap_or("?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_indices_are_dense_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for d in TABLE.iter() {
            assert!(seen.insert(d.intrinsic), "duplicate entry {:?}", d.intrinsic);
            assert!(seen.len() <= TABLE.len());
        }
    }

    #[test]
    fn test_lookup_by_index_and_name_agree() {
        for (index, d) in TABLE.iter().enumerate() {
            assert_eq!(index_of(d.name), Some(index));
            assert_eq!(lookup(index).map(|x| x.intrinsic), Some(d.intrinsic));
        }
        assert!(lookup(TABLE.len()).is_none());
        assert_eq!(index_of("no_such_intrinsic"), None);
    }

    #[test]
    fn test_argc_bounds_are_sane() {
        for d in TABLE.iter() {
            assert!(d.min_argc <= d.max_argc, "{} argc bounds inverted", d.name);
        }
    }

    #[test]
    fn test_names_resolve() {
        assert_eq!(Intrinsic::Print.name(), "print");
        assert_eq!(Intrinsic::AlarmSet.name(), "alarm_set");
        assert_eq!(Intrinsic::FileRead.name(), "fread");
    }
}
