use clap::Parser;
use strongbox::cli::{commands, output, Cli, Commands};

fn main() {
    // Diagnostics go to stderr; RUST_LOG=debug shows bundle and gate activity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => commands::init::execute(&cli),
        Commands::Set {
            ref name,
            ref value,
            kind,
        } => commands::set::execute(&cli, name, value.as_deref(), kind),
        Commands::Get { ref name } => commands::get::execute(&cli, name),
        Commands::List { json } => commands::list::execute(&cli, json),
        Commands::Delete { ref name, force } => commands::delete::execute(&cli, name, force),
        Commands::GenerateKey {
            ref name,
            ref ciphers,
        } => commands::generate_key::execute(&cli, name, ciphers),
        Commands::RotatePassword => commands::rotate::execute(&cli),
    };

    if let Err(e) = result {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}
