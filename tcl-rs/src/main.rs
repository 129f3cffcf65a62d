use std::io::{BufRead, Write};

use tcl::interp::Interp;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut interp = Interp::new();
    interp.set_var("argv0", tcl::Obj::new_string("tclsh"));

    match args.first().map(String::as_str) {
        None => repl(&mut interp),
        Some("-e") => {
            let Some(script) = args.get(1) else {
                eprintln!("tclsh: -e requires a script argument");
                std::process::exit(1);
            };
            run(&mut interp, script);
        }
        Some("-h") | Some("--help") => {
            println!("Usage: tclsh [-e <script> | <file>]");
        }
        Some(path) => {
            let script = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("tclsh: can't read \"{path}\": {e}");
                    std::process::exit(1);
                }
            };
            run(&mut interp, &script);
        }
    }
}

fn run(interp: &mut Interp, script: &str) {
    if let Err(err) = interp.eval(script) {
        eprintln!("tclsh: {}", err.message());
        std::process::exit(1);
    }
}

fn repl(interp: &mut Interp) {
    let ver = env!("CARGO_PKG_VERSION");
    println!("tclsh {ver} — type scripts, Ctrl-D to exit");
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("% ");
        if stdout.flush().is_err() {
            return;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }
        match interp.eval(&line) {
            Ok(result) => {
                let text = result.string();
                if !text.is_empty() {
                    println!("{text}");
                }
            }
            Err(err) => println!("error: {}", err.message()),
        }
    }
}
