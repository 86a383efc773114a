//! Scanner-set configuration: knobs, commands, and debug switches.
//!
//! [`ScannerConfig`] is built by the driver (typically from command-line
//! flags) before the scanner set exists. It carries the input/output paths,
//! the hash algorithm, a name=value map that scanners query with
//! [`get_config`](ScannerConfig::get_config) during registration, and the
//! ordered list of enable/disable commands resolved later by
//! `apply_scanner_commands`.
//!
//! All scanners share one namespace for their knobs; names must be unique
//! across scanners. Each `get_config` call also appends a line to the help
//! text, so the driver can print every settable option after registration.
//!
//! [`DebugFlags`] captures the `SCANNER_SET_DEBUG_*` environment variables
//! into a plain value at scanner-set construction; nothing reads the
//! environment after that point.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

/// Sentinel input name for a recorder set with no backing image file.
pub const NO_INPUT: &str = "<NO-INPUT>";

/// Sentinel output directory: suppresses all file creation and disables
/// every recorder in the set.
pub const NO_OUTDIR: &str = "<NO-OUTDIR>";

/// Whether a command enables or disables its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Enable,
    Disable,
}

/// One enable/disable command, targeting a named scanner or all of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannerCommand {
    pub name: String,
    pub command: Command,
}

impl ScannerCommand {
    /// Distinguished scanner name matching every scanner without `no_all`.
    pub const ALL_SCANNERS: &'static str = "all";
}

/// Full configuration for a scanner set and its feature recorders.
#[derive(Clone, Debug)]
pub struct ScannerConfig {
    /// Where input comes from; [`NO_INPUT`] when scanning without a file.
    pub input_fname: String,
    /// Where output goes; [`NO_OUTDIR`] suppresses all output.
    pub outdir: String,
    /// Hash algorithm for dedup and carving (md5/sha1/sha256, any casing).
    pub hash_algorithm: String,
    /// Bytes of context captured on each side of a feature.
    pub context_window_default: usize,
    /// name=value settings for scanner-defined knobs.
    namevals: BTreeMap<String, String>,
    /// Help text accumulated by `get_config` calls during registration.
    help_str: String,
    /// Ordered enable/disable commands.
    pub scanner_commands: Vec<ScannerCommand>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            input_fname: NO_INPUT.to_string(),
            outdir: NO_OUTDIR.to_string(),
            hash_algorithm: "sha1".to_string(),
            context_window_default: 16,
            namevals: BTreeMap::new(),
            help_str: String::new(),
            scanner_commands: Vec::new(),
        }
    }
}

impl ScannerConfig {
    /// A configuration writing to `outdir` with the default knobs.
    pub fn with_outdir(outdir: impl Into<String>) -> Self {
        Self { outdir: outdir.into(), ..Self::default() }
    }

    /// Returns the output directory, or `None` under [`NO_OUTDIR`].
    pub fn outdir_path(&self) -> Option<PathBuf> {
        (self.outdir != NO_OUTDIR).then(|| PathBuf::from(&self.outdir))
    }

    /// Returns the input file name, or `None` under [`NO_INPUT`].
    pub fn input_path(&self) -> Option<PathBuf> {
        (self.input_fname != NO_INPUT).then(|| PathBuf::from(&self.input_fname))
    }

    /// Sets a name=value pair for scanners to pick up.
    pub fn set_config(&mut self, name: impl Into<String>, val: impl Into<String>) {
        self.namevals.insert(name.into(), val.into());
    }

    /// Reads a typed knob into `val`, leaving it untouched when unset or
    /// unparseable, and records the knob in the help text.
    ///
    /// Scanners call this during registration; `val` arrives holding the
    /// default, which is what the help text shows.
    pub fn get_config<T: FromStr + Display>(&mut self, name: &str, val: &mut T, help: &str) {
        self.help_str.push_str(&format!("   -S {name}={val}    ({help})\n"));
        if let Some(raw) = self.namevals.get(name) {
            if let Ok(parsed) = raw.parse() {
                *val = parsed;
            }
        }
    }

    /// The accumulated help text for every knob queried so far.
    pub fn help(&self) -> &str {
        &self.help_str
    }

    /// Appends an enable/disable command for a named scanner, or
    /// [`ScannerCommand::ALL_SCANNERS`].
    pub fn push_scanner_command(&mut self, name: impl Into<String>, command: Command) {
        self.scanner_commands.push(ScannerCommand { name: name.into(), command });
    }
}

/// Debug switches captured from the environment at set construction.
///
/// Presence of a variable enables the flag; values are ignored. These exist
/// for interactive debugging of scanner behavior and have no effect on
/// results.
#[derive(Clone, Copy, Debug, Default)]
pub struct DebugFlags {
    /// Log each scanner invocation.
    pub print_steps: bool,
    /// Skip dispatch entirely.
    pub no_scanners: bool,
    /// Log every feature write.
    pub scanner: bool,
    /// Hex-dump each sbuf before dispatch.
    pub dump_data: bool,
    /// Verbose codec state in recursive scanners.
    pub decoding: bool,
    /// Extra info.
    pub info: bool,
    /// Driver should print sizes and exit before scanning.
    pub exit_early: bool,
    /// Trace scanner registration.
    pub register: bool,
}

impl DebugFlags {
    /// Reads the `SCANNER_SET_DEBUG_*` variables once.
    pub fn from_env() -> Self {
        let on = |name: &str| std::env::var_os(name).is_some();
        Self {
            print_steps: on("SCANNER_SET_DEBUG_PRINT_STEPS"),
            no_scanners: on("SCANNER_SET_DEBUG_NO_SCANNERS"),
            scanner: on("SCANNER_SET_DEBUG_SCANNER"),
            dump_data: on("SCANNER_SET_DEBUG_DUMP_DATA"),
            decoding: on("SCANNER_SET_DEBUG_DECODING"),
            info: on("SCANNER_SET_DEBUG_INFO"),
            exit_early: on("SCANNER_SET_DEBUG_EXIT_EARLY"),
            register: on("SCANNER_SET_DEBUG_REGISTER"),
        }
    }
}
