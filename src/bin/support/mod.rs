//! A minimal terminal command driver shared by the client binaries.
//!
//! This reimplements just enough of the original's excluded line-command
//! grammar (`original_source/src/libchat/chat-cmd.c`: a `+`/`?`-prefixed
//! line starts an `ADD`/`QUERY`, a lone `.` line terminates either an ADD's
//! message body or, on its own, the session) to make the binaries runnable
//! end to end. Lexical validation of `USER`/`ROOM`/`TOPIC`/`COUNT` is left to
//! the server, which already rejects unknown rooms/topics (spec's `BAD_ROOM`/
//! `BAD_TOPIC`); this driver does not duplicate that.
//!
//! Deliberately outside the library crate: the spec treats terminal command
//! parsing as an external collaborator, not core chat-service logic.

use rusty_chat::client::ChatClient;
use rusty_chat::protocol::channel::FrameChannel;
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        user: String,
        room: String,
        topics: Vec<String>,
        message: String,
    },
    Query {
        room: String,
        count: i64,
        topics: Vec<String>,
    },
    End,
}

fn read_line(reader: &mut impl BufRead) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}

/// The message body for an ADD command: every line up to (not including) a
/// lone `.` terminator, joined by `\n`.
fn read_message_body(reader: &mut impl BufRead) -> std::io::Result<String> {
    let mut lines = Vec::new();
    loop {
        match read_line(reader)? {
            None => break,
            Some(line) if line == "." => break,
            Some(line) => lines.push(line),
        }
    }
    Ok(lines.join("\n"))
}

/// Read and parse the next command. A lone `.` line, or end of input, with
/// no preceding `+`/`?` line, is `END`.
pub fn read_command(reader: &mut impl BufRead) -> std::io::Result<Option<Command>> {
    loop {
        let Some(line) = read_line(reader)? else {
            return Ok(None);
        };
        if line == "." || line.is_empty() {
            return Ok(Some(Command::End));
        }
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("+") => {
                let user = parts.next().unwrap_or_default().to_string();
                let room = parts.next().unwrap_or_default().to_string();
                let topics: Vec<String> = parts.map(|t| t.to_string()).collect();
                let message = read_message_body(reader)?;
                return Ok(Some(Command::Add {
                    user,
                    room,
                    topics,
                    message,
                }));
            }
            Some("?") => {
                let room = parts.next().unwrap_or_default().to_string();
                let rest: Vec<&str> = parts.collect();
                let (count, topic_tokens): (i64, &[&str]) = match rest.first() {
                    Some(tok) if tok.chars().next().is_some_and(|c| c.is_ascii_digit()) => {
                        (tok.parse().unwrap_or(-1), &rest[1..])
                    }
                    _ => (-1, &rest[..]),
                };
                let topics = topic_tokens.iter().map(|t| t.to_string()).collect();
                return Ok(Some(Command::Query {
                    room,
                    count,
                    topics,
                }));
            }
            _ => continue,
        }
    }
}

/// Drive a terminal REPL over one lockstep [`ChatClient`]: read a command,
/// submit it, print its response, repeat until `END` or EOF. Shared by the
/// pipe, FIFO, and shared-memory client binaries, none of which can receive
/// an unsolicited frame outside of a request/response cycle (unlike TCP,
/// which instead runs `client::receive_loop` as a background task).
pub async fn run_repl<C: FrameChannel>(client: &mut ChatClient<C>) {
    let stdin = std::io::stdin();
    let mut reader = stdin.lock();
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();

    loop {
        let cmd = match read_command(&mut reader) {
            Ok(Some(cmd)) => cmd,
            Ok(None) | Err(_) => break,
        };
        let mut out = stdout.lock();
        let mut err = stderr.lock();
        let result = match cmd {
            Command::Add {
                user,
                room,
                topics,
                message,
            } => client.add(&user, &room, &message, &topics, &mut out, &mut err).await,
            Command::Query {
                room,
                count,
                topics,
            } => client.query(&room, &topics, count, &mut out, &mut err).await,
            Command::End => {
                let _ = client.end().await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_add_command_with_topics_and_message() {
        let input = "+ @ZDU Sysprog #db #sqlite\nsqlite is pretty cool\n.\n";
        let mut reader = Cursor::new(input);
        let cmd = read_command(&mut reader).unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Add {
                user: "@ZDU".into(),
                room: "Sysprog".into(),
                topics: vec!["#db".into(), "#sqlite".into()],
                message: "sqlite is pretty cool".into(),
            }
        );
    }

    #[test]
    fn parses_query_command_with_count_and_topics() {
        let input = "? sysprog 10 #db\n";
        let mut reader = Cursor::new(input);
        let cmd = read_command(&mut reader).unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Query {
                room: "sysprog".into(),
                count: 10,
                topics: vec!["#db".into()],
            }
        );
    }

    #[test]
    fn parses_query_command_without_count() {
        let input = "? sysprog #db\n";
        let mut reader = Cursor::new(input);
        let cmd = read_command(&mut reader).unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Query {
                room: "sysprog".into(),
                count: -1,
                topics: vec!["#db".into()],
            }
        );
    }

    #[test]
    fn lone_dot_is_end() {
        let input = ".\n";
        let mut reader = Cursor::new(input);
        assert_eq!(read_command(&mut reader).unwrap().unwrap(), Command::End);
    }

    #[test]
    fn eof_is_end() {
        let mut reader = Cursor::new("");
        assert_eq!(read_command(&mut reader).unwrap().unwrap(), Command::End);
    }
}
