use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Target};
use mongodb::bson::{Bson, Document};

use crate::cli::Verbosity;

/// Log to stdout, and also append to `log_file` when one is given.
pub fn init(verbosity: Verbosity, log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(verbosity.into());
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.target(Target::Pipe(Box::new(Tee { file })));
        }
        None => {
            builder.target(Target::Stdout);
        }
    }
    builder.init();
    Ok(())
}

/// Relaxed extended JSON, the way documents show up in log lines and the result file.
pub fn ext_json(doc: &Document) -> String {
    Bson::Document(doc.clone()).into_relaxed_extjson().to_string()
}

struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn ext_json_keeps_sentinels_and_field_order() {
        let doc = doc! {"b": Bson::MinKey, "a": 1, "c": Bson::MaxKey};
        assert_eq!(
            ext_json(&doc),
            r#"{"b":{"$minKey":1},"a":1,"c":{"$maxKey":1}}"#
        );
    }
}
