use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "carelink-server", about = "CareLink account & session authority")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/carelink.toml")]
    pub config: String,
}
