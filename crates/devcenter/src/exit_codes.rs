//! CLI Exit Code Registry
//!
//! Single source of truth for `devcenter` exit codes. Scripts and CI jobs
//! rely on them, so codes are never renumbered.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success                                                   |
//! | 1    | `diff` found changed cells                                |
//! | 2    | Usage error (bad arguments, missing input, bad format)    |
//! | 3    | Invalid configuration or hierarchy                        |
//! | 4    | I/O error (unreadable export, unwritable output)          |
//! | 5    | `--strict` diagnostics failure                            |

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Reports differ. Like `diff(1)`, exit 1 means "inputs differ."
pub const EXIT_DIFF_CHANGES: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Run config or hierarchy failed to parse or validate (including cycles
/// and duplicate units), or an export lacks a required column.
pub const EXIT_CONFIG: u8 = 3;

/// An export, config or output file could not be read or written.
pub const EXIT_IO: u8 = 4;

/// `--strict`: rows failed to parse, or unattributed rows exceeded the
/// configured ratio. The report is still written.
pub const EXIT_STRICT: u8 = 5;
