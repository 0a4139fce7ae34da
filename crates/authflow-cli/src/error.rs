use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let msg = format!("{:#}", err).to_lowercase();

    if msg.contains("secret key is required") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Provide the console management key with:");
        eprintln!("  {} export AUTHFLOW_SECRET_KEY=<value>", "$".dimmed());
    }

    if msg.contains("chromium executable not found") || msg.contains("chromium not found") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Install Chrome/Chromium, or point authflow at one with:");
        eprintln!("  {} export AUTHFLOW_CHROME=/path/to/chromium", "$".dimmed());
        eprintln!("  Check the runtime with:");
        eprintln!("  {} authflow probe", "$".dimmed());
    }

    if msg.contains("no valid accounts") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Inspect how the file is parsed with:");
        eprintln!("  {} authflow accounts --accounts <file>", "$".dimmed());
    }

    if msg.contains("connection refused") || msg.contains("network") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Check that the console is running and reachable (--console-url).");
    }

    std::process::exit(1);
}
