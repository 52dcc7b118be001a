//! Parses a job's YAML script into an ordered list of [`Command`]s and
//! groups them by the `where` field's scheduling hint.
//!
//! Grouping invariant: index 0 always starts a fresh group; `where == -1`
//! starts a fresh group; `where == 0` joins the previous command's group;
//! `where == k >= 1` joins `cmds[k-1]`'s group. Every command in one group
//! is dispatched to the same Worker.

use std::path::Path;

use bubble_env::Any;

use crate::command::{apply_field, Command};
use crate::error::ScriptError;

/// A set of commands that must run on the same Worker.
#[derive(Debug, Default)]
pub struct Group {
    pub cmds: Vec<usize>,
}

/// Parse `bytes` (a YAML document) into commands plus their groups. Log
/// files for each command are rooted at `log_dir` (the Runner's directory).
pub fn parse(bytes: &[u8], log_dir: &Path) -> Result<(Vec<Command>, Vec<Group>), ScriptError> {
    let script = Any::from_yaml_bytes(bytes)?;
    let items = script.array().ok_or(ScriptError::NotAnArray)?;

    let mut cmds: Vec<Command> = Vec::with_capacity(items.len());
    let mut groups: Vec<Group> = Vec::new();

    for (i, item) in items.iter().enumerate() {
        let detail = item.map().ok_or(ScriptError::BadCommand(i))?;

        let mut cmd = Command::new(i, 0, log_dir);
        for (k, v) in detail {
            apply_field(&mut cmd, k, v);
        }

        let group_id = if cmd.where_ == -1 || i == 0 {
            groups.push(Group::default());
            groups.len() - 1
        } else if cmd.where_ == 0 {
            cmds[i - 1].group
        } else {
            cmds[(cmd.where_ - 1) as usize].group
        };
        cmd.group = group_id;
        groups[group_id].cmds.push(i);

        cmds.push(cmd);
    }

    Ok((cmds, groups))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("bubble-script-test-{}", bubble_env::next_id()))
    }

    #[test]
    fn each_command_without_where_joins_the_previous_group() {
        let yaml = b"- action: shell\n  script: [echo a]\n- action: shell\n  script: [echo b]\n";
        let (cmds, groups) = parse(yaml, &dir()).unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(groups.len(), 1);
        assert_eq!(cmds[0].group, cmds[1].group);
    }

    #[test]
    fn where_zero_joins_the_previous_command() {
        let yaml = b"- action: shell\n  script: [a]\n- action: shell\n  script: [b]\n  where: 0\n";
        let (cmds, groups) = parse(yaml, &dir()).unwrap();
        assert_eq!(cmds[0].group, cmds[1].group);
        assert_eq!(groups[cmds[0].group].cmds, vec![0, 1]);
    }

    #[test]
    fn where_target_index_joins_that_commands_group() {
        let yaml = b"- action: a\n  script: [a]\n- action: b\n  script: [b]\n  where: -1\n- action: c\n  script: [c]\n  where: 1\n";
        let (cmds, _groups) = parse(yaml, &dir()).unwrap();
        assert_eq!(cmds[2].group, cmds[0].group);
        assert_ne!(cmds[1].group, cmds[0].group);
    }

    #[test]
    fn first_command_always_starts_fresh_even_with_explicit_where() {
        let yaml = b"- action: a\n  script: [a]\n  where: 5\n";
        let (cmds, groups) = parse(yaml, &dir()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(cmds[0].group, 0);
    }

    #[test]
    fn non_array_script_is_rejected() {
        let yaml = b"action: shell\n";
        assert!(matches!(parse(yaml, &dir()), Err(ScriptError::NotAnArray)));
    }
}
