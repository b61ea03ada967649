use std::{env, fs};

use objtab_dsl::digest::schema_digest_v1;
use objtab_dsl::schema_v1::parse_schema_v1;

fn main() {
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: objtab_parse_schema_v1 <file.schema>");
        std::process::exit(2);
    };
    if args.next().is_some() {
        eprintln!("usage: objtab_parse_schema_v1 <file.schema>");
        std::process::exit(2);
    }

    let text = match fs::read_to_string(&path) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("failed to read `{path}`: {err}");
            std::process::exit(2);
        }
    };

    match parse_schema_v1(&text) {
        Ok(module) => {
            let attributes: usize = module.models.iter().map(|m| m.attributes.len()).sum();
            println!(
                "ok(schema_v1): schema={} models={} attributes={} digest={}",
                module.schema_name,
                module.models.len(),
                attributes,
                schema_digest_v1(&text)
            );
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
