//! The Imagefile build language.
//!
//! One instruction per line; `#` starts a comment. `CMD` and
//! `ENTRYPOINT` take a JSON argv array, everything else takes plain
//! words.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ImagefileError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    From(PathBuf),
    Env(String, String),
    Run(String),
    Copy(PathBuf, PathBuf),
    Workdir(PathBuf),
    Cmd(Vec<String>),
    Entrypoint(Vec<String>),
}

pub fn parse(content: &str) -> Result<Vec<Instruction>, ImagefileError> {
    let mut instructions = vec![];

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (keyword, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (trimmed, ""),
        };

        let syntax = |message: String| ImagefileError::Syntax { line, message };

        let instruction = match keyword {
            "FROM" => {
                if rest.is_empty() {
                    return Err(syntax("FROM needs a rootfs path".into()));
                }
                Instruction::From(PathBuf::from(rest))
            }
            "ENV" => {
                let (key, value) = rest
                    .split_once('=')
                    .ok_or_else(|| syntax(format!("ENV expects K=V, got {rest:?}")))?;
                if key.is_empty() {
                    return Err(syntax("ENV key is empty".into()));
                }
                Instruction::Env(key.to_owned(), value.to_owned())
            }
            "RUN" => {
                if rest.is_empty() {
                    return Err(syntax("RUN needs a shell command".into()));
                }
                Instruction::Run(rest.to_owned())
            }
            "COPY" => {
                let mut parts = rest.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(src), Some(dst), None) => {
                        Instruction::Copy(PathBuf::from(src), PathBuf::from(dst))
                    }
                    _ => return Err(syntax("COPY expects exactly <src> <dst>".into())),
                }
            }
            "WORKDIR" => {
                if rest.is_empty() {
                    return Err(syntax("WORKDIR needs a path".into()));
                }
                Instruction::Workdir(PathBuf::from(rest))
            }
            "CMD" => Instruction::Cmd(parse_argv(rest).map_err(syntax)?),
            "ENTRYPOINT" => Instruction::Entrypoint(parse_argv(rest).map_err(syntax)?),
            other => return Err(syntax(format!("unknown instruction {other:?}"))),
        };
        instructions.push(instruction);
    }

    match instructions.first() {
        Some(Instruction::From(_)) => Ok(instructions),
        Some(_) => Err(ImagefileError::Syntax {
            line: 1,
            message: "the first instruction must be FROM".into(),
        }),
        None => Err(ImagefileError::Syntax {
            line: 1,
            message: "empty Imagefile".into(),
        }),
    }
}

fn parse_argv(rest: &str) -> Result<Vec<String>, String> {
    let argv: Vec<String> = serde_json::from_str(rest)
        .map_err(|err| format!("expected a JSON argv array: {err}"))?;
    if argv.is_empty() {
        return Err("argv array is empty".into());
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let content = r#"
# base image
FROM /srv/images/base

ENV LANG=C.UTF-8
WORKDIR /srv
COPY app.sh /usr/local/bin/app.sh
RUN chmod +x /usr/local/bin/app.sh
ENTRYPOINT ["/usr/local/bin/app.sh"]
CMD ["--serve"]
"#;
        let instructions = parse(content).unwrap();
        assert_eq!(instructions.len(), 7);
        assert_eq!(
            instructions[0],
            Instruction::From(PathBuf::from("/srv/images/base"))
        );
        assert_eq!(
            instructions[1],
            Instruction::Env("LANG".into(), "C.UTF-8".into())
        );
        assert_eq!(
            instructions[6],
            Instruction::Cmd(vec!["--serve".into()])
        );
    }

    #[test]
    fn test_first_instruction_must_be_from() {
        let err = parse("RUN echo hi\n").unwrap_err();
        assert!(err.to_string().contains("must be FROM"));
    }

    #[test]
    fn test_cmd_requires_json_array() {
        assert!(parse("FROM /a\nCMD echo hi\n").is_err());
        assert!(parse("FROM /a\nCMD []\n").is_err());
    }

    #[test]
    fn test_bad_env_rejected() {
        assert!(parse("FROM /a\nENV NOVALUE\n").is_err());
        assert!(parse("FROM /a\nENV =x\n").is_err());
    }

    #[test]
    fn test_unknown_instruction_rejected() {
        let err = parse("FROM /a\nEXPOSE 80\n").unwrap_err();
        assert!(err.to_string().contains("unknown instruction"));
    }
}
