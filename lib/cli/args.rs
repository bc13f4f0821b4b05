use std::path::PathBuf;

use clap::Parser;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// ferry is a tool for copying filesystem content into and out of a confined
/// directory tree as tar streams
#[derive(Debug, Parser)]
#[command(name = "ferry", author)]
pub struct FerryArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<FerrySubcommand>,

    /// Show version
    #[arg(short = 'v', long)]
    pub version: bool,
}

/// Available subcommands, one per copier operation
#[derive(Debug, Parser)]
pub enum FerrySubcommand {
    /// Resolve a path inside the root, following symlinks safely
    #[command(name = "eval")]
    Eval {
        /// The confinement root
        #[arg(short = 'r', long, default_value = "/")]
        root: PathBuf,

        /// The path to resolve
        #[arg()]
        directory: PathBuf,
    },

    /// Describe filesystem entries matching glob patterns
    #[command(name = "stat")]
    Stat {
        /// The confinement root
        #[arg(short = 'r', long, default_value = "/")]
        root: PathBuf,

        /// The working directory, absolute or relative to the root
        #[arg(short = 'd', long, default_value = "")]
        directory: PathBuf,

        /// Exclude patterns; prefix with '!' to re-include
        #[arg(short = 'x', long = "exclude")]
        excludes: Vec<String>,

        /// Probe regular files for tar content
        #[arg(long)]
        check_archives: bool,

        /// Glob patterns to match
        #[arg(required = true)]
        globs: Vec<String>,
    },

    /// Stream matched entries to stdout (or a file) as a tar archive
    #[command(name = "get")]
    Get {
        /// The confinement root
        #[arg(short = 'r', long, default_value = "/")]
        root: PathBuf,

        /// The working directory, absolute or relative to the root
        #[arg(short = 'd', long, default_value = "")]
        directory: PathBuf,

        /// Exclude patterns; prefix with '!' to re-include
        #[arg(short = 'x', long = "exclude")]
        excludes: Vec<String>,

        /// Write the archive here instead of stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Keep the matched directories' own names as name prefixes
        #[arg(short = 'k', long)]
        keep_directory_names: bool,

        /// Emit symlinks matched by a glob as symlinks instead of their targets
        #[arg(long)]
        no_deref_symlinks: bool,

        /// Keep going when an item can't be read
        #[arg(long)]
        ignore_unreadable: bool,

        /// Also emit each match's ancestor directories
        #[arg(long)]
        parents: bool,

        /// Glob patterns to match
        #[arg(required = true)]
        globs: Vec<String>,
    },

    /// Extract a tar archive from stdin (or a file) under the directory
    #[command(name = "put")]
    Put {
        /// The confinement root
        #[arg(short = 'r', long, default_value = "/")]
        root: PathBuf,

        /// The working directory, absolute or relative to the root
        #[arg(short = 'd', long, default_value = "")]
        directory: PathBuf,

        /// Read the archive here instead of stdin
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,

        /// Skip character and block device entries
        #[arg(long)]
        ignore_devices: bool,

        /// Refuse to replace a directory with a non-directory
        #[arg(long)]
        no_overwrite_dir_non_dir: bool,

        /// Refuse to replace a non-directory with a directory
        #[arg(long)]
        no_overwrite_non_dir_dir: bool,
    },

    /// Create a directory chain under the root
    #[command(name = "mkdir")]
    Mkdir {
        /// The confinement root
        #[arg(short = 'r', long, default_value = "/")]
        root: PathBuf,

        /// The directory chain to create
        #[arg()]
        directory: PathBuf,

        /// Permissions for newly-created directories, octal
        #[arg(short = 'm', long)]
        mode: Option<String>,
    },

    /// Remove an item under the root
    #[command(name = "remove")]
    Remove {
        /// The confinement root
        #[arg(short = 'r', long, default_value = "/")]
        root: PathBuf,

        /// The item to remove
        #[arg()]
        item: PathBuf,

        /// Remove directory contents recursively
        #[arg(short = 'a', long)]
        all: bool,
    },
}
