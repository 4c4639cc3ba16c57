use specrun::command::{Command, CommandRegistry};
use std::io::Write;
use std::path::PathBuf;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let project_base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let registry = CommandRegistry::standard();
    let command = Command::new(&project_base_dir, &registry);

    let mut stdout = std::io::stdout();
    let code = command.run(&args, &mut stdout);
    let _ = stdout.flush();

    std::process::exit(code);
}
