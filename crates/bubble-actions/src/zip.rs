//! `zip` compresses a named path under `Cwd()` into a target archive,
//! stored uncompressed (matching the Go original's `archive/zip` use, which sets
//! `zipper.Store` explicitly rather than deflating).
//!
//! ```yaml
//! -
//!  action: zip
//!  script:
//!   - ./a.zip ./any/folder ./any/file
//! ```

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use async_trait::async_trait;
use bubble_env::{Any, Env};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::action::{split_args, Action, ActionBase, ActionFactory, ActionLog};
use crate::error::ActionError;

#[derive(Default)]
pub struct ZipFactory;

impl ActionFactory for ZipFactory {
    fn validate(&mut self, _conf: &Any) -> Result<(), ActionError> {
        Ok(())
    }

    fn create(&self) -> Box<dyn Action> {
        Box::new(ZipAction { base: ActionBase::new() })
    }
}

pub struct ZipAction {
    base: ActionBase,
}

#[async_trait]
impl Action for ZipAction {
    async fn init(&mut self, runner_id: u64, env: &mut Env) -> Result<(), ActionError> {
        self.base.init(runner_id, env).await
    }

    fn cwd(&self) -> &Path {
        self.base.cwd()
    }

    async fn execute(&self, script: &Any, _target: &str, env: &Env, _log: &dyn ActionLog) -> bool {
        let Some(lines) = script.array() else {
            self.base.set_error("zip command format is incorrect");
            return false;
        };

        self.base.clear_error();
        for code in lines {
            let args = split_args(&env.format(code));
            if args.len() < 2 {
                continue;
            }
            if let Err(err) = compress(self.base.cwd(), &args[0], &args[1..]) {
                self.base.set_error(err);
                return false;
            }
        }

        true
    }

    async fn cancel(&self) -> Result<(), ActionError> {
        Ok(())
    }

    fn error(&self) -> Option<String> {
        self.base.error()
    }
}

fn compress(cwd: &Path, target: &str, files: &[String]) -> Result<(), ActionError> {
    let file_path = cwd.join(target);
    if file_path.exists() {
        std::fs::remove_file(&file_path)?;
    }

    let zip_file = File::create(&file_path)?;
    let mut writer = ZipWriter::new(zip_file);
    for file in files {
        add_to_zip(&mut writer, cwd, file)?;
    }
    writer.finish()?;
    Ok(())
}

fn add_to_zip(writer: &mut ZipWriter<File>, cwd: &Path, rel: &str) -> Result<(), ActionError> {
    let path = cwd.join(rel);
    let meta = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    if meta.is_dir() {
        for entry in std::fs::read_dir(&path)?.flatten() {
            let child_rel = format!("{rel}/{}", entry.file_name().to_string_lossy());
            add_to_zip(writer, cwd, &child_rel)?;
        }
    } else {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file(rel, options)?;
        let mut f = File::open(&path)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        writer.write_all(&buf)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use bubble_env::Env;

    use super::*;

    struct NullLog;
    impl ActionLog for NullLog {
        fn write(&self, _bytes: &[u8]) {}
    }

    #[tokio::test]
    async fn compresses_a_file_into_the_target_archive() {
        let mut action = ZipFactory.create();
        let mut env = Env::new();
        action.init(bubble_env::next_id(), &mut env).await.unwrap();

        std::fs::write(action.cwd().join("hello.txt"), b"hi").unwrap();

        let script = Any::Array(vec![Any::from("out.zip hello.txt")]);
        let ok = action.execute(&script, "", &env, &NullLog).await;
        assert!(ok, "{:?}", action.error());
        assert!(action.cwd().join("out.zip").exists());
    }
}
