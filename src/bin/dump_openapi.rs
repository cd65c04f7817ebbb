use std::fs;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    // Usage: dump_openapi [output-path], defaults to stdout.
    let doc = hr_admin::docs::build_openapi(8000, false)?;
    let rendered = serde_json::to_string_pretty(&doc)?;

    match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            fs::write(&path, rendered)?;
            eprintln!("wrote {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
