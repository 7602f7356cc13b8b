//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `tagvault_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

use tagvault_core::db::migrations::latest_version;
use tagvault_core::db::open_db_in_memory;

fn main() {
    println!("tagvault_core ping={}", tagvault_core::ping());
    println!("tagvault_core version={}", tagvault_core::core_version());

    match open_db_in_memory() {
        Ok(_) => println!("tagvault_core schema=v{} bootstrap=ok", latest_version()),
        Err(err) => {
            eprintln!("tagvault_core bootstrap=failed error={err}");
            std::process::exit(1);
        }
    }
}
