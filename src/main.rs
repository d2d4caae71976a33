fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if handle_cli_flags(&args) {
        return;
    }

    let invocation = match snapgram::app::parse_args(args) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("error: {err}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(err) = snapgram::run(invocation) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

const USAGE: &str = "usage: snapgram [--offline] [--config PATH] <show|like|save> <post-id>";

fn handle_cli_flags(args: &[String]) -> bool {
    let mut saw_flag = false;
    for arg in args {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Snapgram {}", snapgram::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "Snapgram — like and save posts from the terminal.\n\n{USAGE}\n\n  show <post-id>       Print a post and its like/save state\n  like <post-id>       Toggle your like on a post\n  save <post-id>       Toggle whether a post is saved\n\n  --offline            Use the built-in sample backend\n  --config PATH        Read settings from PATH\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}
