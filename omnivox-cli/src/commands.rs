//! Line protocol: one command per line, `<verb> <args>`.
//!
//! | Verb | Arguments |
//! |------|-----------|
//! | `s`, `say`, `tts_say`, `ttssay` | text to speak |
//! | `sync` | — wait for playback to finish |
//! | `st`, `stop` | — drop everything queued |
//! | `l`, `letter` | speak the first character |
//! | `t`, `tone` | `<hz> <ms>` |
//! | `sh`, `silence` | `<ms>` |
//! | `r`, `rate` | `<words per minute>` |
//! | `split_caps` | `1`/`true` or anything else for off |
//! | `punctuations` | mode name |
//! | `play` | WAV file path |
//! | `quit` | — |

use std::path::PathBuf;

use thiserror::Error;

/// Longest line handled in one piece; longer input is split at this many bytes.
pub const MAX_LINE_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Say(String),
    Sync,
    Stop,
    Letter(String),
    Tone { frequency: f32, duration_ms: u32 },
    Silence { duration_ms: u32 },
    Rate(u32),
    SplitCaps(bool),
    Punctuations(String),
    Play(PathBuf),
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("invalid {verb} command format. Use: {usage}")]
    Usage {
        verb: &'static str,
        usage: &'static str,
    },
}

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, args) = match line.split_once(char::is_whitespace) {
        Some((verb, args)) => (verb, args.trim()),
        None => (line, ""),
    };

    let cmd = match verb {
        "s" | "say" | "tts_say" | "ttssay" => Command::Say(args.to_string()),
        "sync" => Command::Sync,
        "st" | "stop" => Command::Stop,
        "l" | "letter" => Command::Letter(args.to_string()),
        "t" | "tone" => {
            let mut parts = args.split_whitespace();
            let frequency = parts.next().and_then(|p| p.parse::<f32>().ok());
            let duration_ms = parts.next().and_then(|p| p.parse::<u32>().ok());
            match (frequency, duration_ms) {
                (Some(frequency), Some(duration_ms)) if frequency.is_finite() && frequency > 0.0 => {
                    Command::Tone {
                        frequency,
                        duration_ms,
                    }
                }
                _ => {
                    return Err(CommandError::Usage {
                        verb: "tone",
                        usage: "tone <pitch> <duration>",
                    })
                }
            }
        }
        "sh" | "silence" => match args.parse::<u32>() {
            Ok(duration_ms) => Command::Silence { duration_ms },
            Err(_) => {
                return Err(CommandError::Usage {
                    verb: "silence",
                    usage: "silence <duration>",
                })
            }
        },
        "r" | "rate" => match args.parse::<u32>() {
            Ok(wpm) => Command::Rate(wpm),
            Err(_) => {
                return Err(CommandError::Usage {
                    verb: "rate",
                    usage: "rate <words per minute>",
                })
            }
        },
        "split_caps" => Command::SplitCaps(args == "1" || args.eq_ignore_ascii_case("true")),
        "punctuations" => Command::Punctuations(args.to_string()),
        "play" if !args.is_empty() => Command::Play(PathBuf::from(args)),
        "play" => {
            return Err(CommandError::Usage {
                verb: "play",
                usage: "play <file.wav>",
            })
        }
        "quit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(cmd))
}

/// Split `line` into pieces of at most `limit` bytes on char boundaries.
pub fn split_line(line: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(4);
    let mut pieces = Vec::new();
    let mut rest = line;
    while rest.len() > limit {
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    pieces.push(rest);
    pieces
}

/// One bounded slice of input. A line longer than [`MAX_LINE_BYTES`] arrives
/// as a first piece followed by continuation pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePiece {
    pub text: String,
    pub starts_line: bool,
}

/// Cuts a byte stream into [`LinePiece`]s without ever holding more than
/// `limit + 1` bytes.
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    limit: usize,
    mid_line: bool,
}

impl LineSplitter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(4);
        Self {
            buf: Vec::with_capacity(limit + 1),
            limit,
            mid_line: false,
        }
    }

    /// Copy as much of `input` as there is room for; returns bytes taken.
    /// Call only after [`next_piece`](Self::next_piece) returned `None`.
    pub fn feed(&mut self, input: &[u8]) -> usize {
        let room = (self.limit + 1).saturating_sub(self.buf.len());
        let n = input.len().min(room);
        self.buf.extend_from_slice(&input[..n]);
        n
    }

    /// The next finished piece: a terminated line, or `limit` bytes of one
    /// that is still going.
    pub fn next_piece(&mut self) -> Option<LinePiece> {
        if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Some(self.piece(line, true));
        }
        if self.buf.len() > self.limit {
            // Back off to a UTF-8 boundary so no character is split.
            let mut cut = self.limit;
            while cut > 0 && self.buf[cut] & 0xC0 == 0x80 {
                cut -= 1;
            }
            if cut == 0 {
                cut = self.limit;
            }
            let head: Vec<u8> = self.buf.drain(..cut).collect();
            return Some(self.piece(head, false));
        }
        None
    }

    /// Whatever is left once the input has ended.
    pub fn finish(&mut self) -> Option<LinePiece> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(self.piece(rest, true))
    }

    fn piece(&mut self, bytes: Vec<u8>, ends_line: bool) -> LinePiece {
        let starts_line = !self.mid_line;
        self.mid_line = !ends_line;
        LinePiece {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            starts_line,
        }
    }
}

/// Turns pieces into commands. Continuation pieces of a `say` are spoken as
/// further text; continuations of any other command are dropped.
#[derive(Debug, Default)]
pub struct PieceDecoder {
    say_continues: bool,
}

impl PieceDecoder {
    pub fn decode(&mut self, piece: &LinePiece) -> Option<Result<Command, CommandError>> {
        if piece.starts_line {
            self.say_continues = false;
            let parsed = parse_command(&piece.text).transpose()?;
            self.say_continues = matches!(parsed, Ok(Command::Say(_)));
            return Some(parsed);
        }
        let text = piece.text.trim();
        if self.say_continues {
            return (!text.is_empty()).then(|| Ok(Command::Say(text.to_string())));
        }
        tracing::warn!(bytes = piece.text.len(), "over-long command line truncated");
        None
    }
}

/// Decode a whole input line, splitting it at [`MAX_LINE_BYTES`].
pub fn decode_line(line: &str) -> Vec<Result<Command, CommandError>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut decoder = PieceDecoder::default();
    split_line(line, MAX_LINE_BYTES)
        .into_iter()
        .enumerate()
        .filter_map(|(i, text)| {
            decoder.decode(&LinePiece {
                text: text.to_string(),
                starts_line: i == 0,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn say_aliases_carry_text() {
        for verb in ["s", "say", "tts_say", "ttssay"] {
            let cmd = parse_command(&format!("{verb} hello world")).unwrap();
            assert_eq!(cmd, Some(Command::Say("hello world".into())));
        }
    }

    #[test]
    fn bare_verbs() {
        assert_eq!(parse_command("sync").unwrap(), Some(Command::Sync));
        assert_eq!(parse_command("st").unwrap(), Some(Command::Stop));
        assert_eq!(parse_command("stop").unwrap(), Some(Command::Stop));
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn tone_needs_pitch_and_duration() {
        assert_eq!(
            parse_command("t 440 250").unwrap(),
            Some(Command::Tone {
                frequency: 440.0,
                duration_ms: 250
            })
        );
        assert!(matches!(
            parse_command("tone 440"),
            Err(CommandError::Usage { verb: "tone", .. })
        ));
        assert!(parse_command("t inf 100").is_err());
        assert!(parse_command("t NaN 100").is_err());
    }

    #[test]
    fn numeric_arguments_are_validated() {
        assert_eq!(
            parse_command("sh 300").unwrap(),
            Some(Command::Silence { duration_ms: 300 })
        );
        assert_eq!(parse_command("r 250").unwrap(), Some(Command::Rate(250)));
        assert!(parse_command("rate fast").is_err());
        assert!(parse_command("silence").is_err());
    }

    #[test]
    fn settings_commands() {
        assert_eq!(
            parse_command("split_caps true").unwrap(),
            Some(Command::SplitCaps(true))
        );
        assert_eq!(
            parse_command("split_caps 0").unwrap(),
            Some(Command::SplitCaps(false))
        );
        assert_eq!(
            parse_command("punctuations all").unwrap(),
            Some(Command::Punctuations("all".into()))
        );
    }

    #[test]
    fn unknown_verb_is_reported() {
        assert_eq!(
            parse_command("dance now"),
            Err(CommandError::Unknown("dance".into()))
        );
    }

    #[test]
    fn split_respects_char_boundaries() {
        let text = "é".repeat(10);
        let pieces = split_line(&text, 5);
        assert!(pieces.iter().all(|p| p.len() <= 5));
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn long_say_line_is_spoken_in_pieces() {
        let line = format!("say {}", "a".repeat(MAX_LINE_BYTES * 2));
        let cmds = decode_line(&line);
        assert_eq!(cmds.len(), 3);
        assert!(cmds.iter().all(|c| matches!(c, Ok(Command::Say(_)))));
    }

    #[test]
    fn long_non_say_line_is_truncated() {
        let line = format!("punctuations {}", "x".repeat(MAX_LINE_BYTES));
        let cmds = decode_line(&line);
        assert_eq!(cmds.len(), 1);
    }

    fn pieces(splitter: &mut LineSplitter, input: &[u8]) -> Vec<LinePiece> {
        let mut out = Vec::new();
        let mut rest = input;
        loop {
            while let Some(p) = splitter.next_piece() {
                out.push(p);
            }
            if rest.is_empty() {
                break;
            }
            let n = splitter.feed(rest);
            rest = &rest[n..];
        }
        out.extend(splitter.finish());
        out
    }

    #[test]
    fn splitter_yields_terminated_lines() {
        let mut splitter = LineSplitter::new(64);
        let got = pieces(&mut splitter, b"say hi\r\nsync\ntail");
        let texts: Vec<_> = got.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, ["say hi", "sync", "tail"]);
        assert!(got.iter().all(|p| p.starts_line));
    }

    #[test]
    fn unterminated_input_is_cut_at_the_limit() {
        let mut splitter = LineSplitter::new(MAX_LINE_BYTES);
        let input = vec![b'x'; MAX_LINE_BYTES * 3 + 10];
        let got = pieces(&mut splitter, &input);
        assert_eq!(got.len(), 4);
        assert!(got.iter().all(|p| p.text.len() <= MAX_LINE_BYTES));
        assert!(got[0].starts_line);
        assert!(got[1..].iter().all(|p| !p.starts_line));
        assert_eq!(got[3].text.len(), 10);
    }

    #[test]
    fn splitter_keeps_characters_whole() {
        let mut splitter = LineSplitter::new(5);
        let text = "é".repeat(6);
        let got = pieces(&mut splitter, text.as_bytes());
        assert_eq!(got.iter().map(|p| p.text.as_str()).collect::<String>(), text);
    }

    #[test]
    fn decoder_follows_say_across_pieces() {
        let mut decoder = PieceDecoder::default();
        let first = LinePiece {
            text: "say hello".into(),
            starts_line: true,
        };
        let more = LinePiece {
            text: " world ".into(),
            starts_line: false,
        };
        assert_eq!(decoder.decode(&first), Some(Ok(Command::Say("hello".into()))));
        assert_eq!(decoder.decode(&more), Some(Ok(Command::Say("world".into()))));

        let stop = LinePiece {
            text: "stop".into(),
            starts_line: true,
        };
        assert_eq!(decoder.decode(&stop), Some(Ok(Command::Stop)));
        assert_eq!(decoder.decode(&more), None);
    }
}
