//! Prints the PHC hash of a password for the `[users]` settings section.
//!
//! $ cargo run --bin hash_password -- wonderland

use clap::Parser;
use idp_bridge::application_impl::hash_password;

#[derive(Parser, Debug)]
struct Args {
    password: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let hash = hash_password(&args.password)?;
    println!("{}", hash);
    Ok(())
}
