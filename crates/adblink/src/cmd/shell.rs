use std::io::BufRead;

use tracing::debug;

use crate::cmd::{establish, ShellArgs};
use crate::exit::{conn_error, CliResult, SUCCESS};
use crate::output::print_raw;

/// Interactive shell: pump stdin lines to the device, stream output back.
pub fn run(args: ShellArgs) -> CliResult<i32> {
    let connection = establish(&args.connect)?;
    let stream = connection
        .open("shell:")
        .map_err(|err| conn_error("open shell failed", err))?;

    // Stdin pump on the side; the output loop below decides when we are done.
    let writer = {
        let stream = stream.clone();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => {
                        // EOF: half-close so the device can finish up.
                        let _ = stream.close();
                        return;
                    }
                    Ok(_) => {
                        if stream.write(line.as_bytes()).is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        })
    };

    loop {
        match stream.read() {
            Ok(Some(chunk)) => print_raw(&chunk),
            Ok(None) => break,
            Err(err) => {
                connection.close();
                return Err(conn_error("shell stream failed", err));
            }
        }
    }

    debug!("shell stream ended");
    drop(writer);
    connection.close();
    Ok(SUCCESS)
}
