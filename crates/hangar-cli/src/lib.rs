//! hangar - mobile build inspection CLI
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! Thin command-line front end over `hangar-core`: extract metadata from
//! `.ipa`/`.apk` artifacts as JSON, and resolve device-specific Android
//! install sets.

pub mod cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "hangar")]
#[command(author, version, about = "Inspect mobile builds and resolve install sets")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract build metadata from an .ipa or .apk and print it as JSON
    Extract {
        /// Path to the artifact
        path: PathBuf,

        /// Also write the recovered icon PNG to this path
        #[arg(long)]
        icon_out: Option<PathBuf>,
    },

    /// Resolve the APK set a specific device would install
    Resolve {
        /// Opaque build identifier echoed back in the result
        #[arg(long, default_value = "local")]
        build_id: String,

        /// Path to the .apk, .aab, or .apks artifact
        path: PathBuf,

        /// Directory the resolved APKs are extracted into
        #[arg(long)]
        output_dir: PathBuf,

        /// Device OS version (SDK level, e.g. 33)
        #[arg(long)]
        os_version: Option<String>,

        /// Device ABI (e.g. arm64-v8a)
        #[arg(long)]
        abi: Option<String>,

        /// Device locale (e.g. en-US)
        #[arg(long)]
        locale: Option<String>,

        /// Device screen density in dpi
        #[arg(long)]
        screen_density: Option<String>,
    },
}
