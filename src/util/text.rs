use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: char = '\x07';

fn is_stripped_control(c: char) -> bool {
    c == '\x7f' || (c.is_ascii_control() && !matches!(c, '\t' | '\n' | '\r'))
}

/// SEC-001: Strips control characters and ANSI escape sequences from feed text.
///
/// Feed titles and descriptions are attacker-controlled and end up in
/// terminals and logs. Removed:
///
/// - ASCII control chars other than tab, newline and carriage return, and DEL
/// - CSI sequences `ESC [` ... final byte 0x40-0x7E
/// - OSC sequences `ESC ]` ... BEL or `ESC \`
/// - any other bare ESC
///
/// Clean input is returned borrowed.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ESC {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    // parameter and intermediate bytes up to the final byte
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == BEL {
                            break;
                        }
                        if c == ESC && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_stripped_control(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}
