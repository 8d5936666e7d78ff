use adblink_auth::KeyStore;

use crate::cmd::{resolve_key_dir, KeygenArgs};
use crate::exit::{auth_error, CliResult, SUCCESS};

/// Ensure a usable key pair exists, regenerating on demand.
pub fn run(args: KeygenArgs) -> CliResult<i32> {
    let dir = resolve_key_dir(args.key_dir);
    let store = KeyStore::in_dir(&dir);

    if args.force {
        store
            .remove()
            .map_err(|err| auth_error("discarding old key failed", err))?;
    }

    let existed = !args.force
        && store
            .load()
            .map_err(|err| auth_error("key load failed", err))?
            .is_some();

    store
        .load_or_generate()
        .map_err(|err| auth_error("key setup failed", err))?;

    if existed {
        println!("existing key pair at {}", store.private_path().display());
    } else {
        println!("generated key pair at {}", store.private_path().display());
    }
    println!("public key at {}", store.public_path().display());

    Ok(SUCCESS)
}
