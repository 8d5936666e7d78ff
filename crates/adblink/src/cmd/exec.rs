use tracing::debug;

use crate::cmd::{establish, ExecArgs};
use crate::exit::{conn_error, CliResult, SUCCESS};
use crate::output::{print_exec, OutputFormat};

/// One-shot exec: open `shell:<command>`, capture until the device closes.
pub fn run(args: ExecArgs, format: OutputFormat) -> CliResult<i32> {
    let service = format!("shell:{}", args.command.join(" "));

    let connection = establish(&args.connect)?;
    let stream = connection
        .open(&service)
        .map_err(|err| conn_error("open failed", err))?;

    let mut output = Vec::new();
    loop {
        match stream.read() {
            Ok(Some(chunk)) => output.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(err) => {
                connection.close();
                return Err(conn_error("exec stream failed", err));
            }
        }
    }

    debug!(service, bytes = output.len(), "exec complete");
    connection.close();

    print_exec(&service, &output, format);
    Ok(SUCCESS)
}
