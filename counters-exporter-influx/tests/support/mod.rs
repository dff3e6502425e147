#![allow(dead_code)]

use std::str::Chars;

/// A single message, split back into its parts with escapes removed.
#[derive(Debug, PartialEq, Eq)]
pub struct Line {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub value: u64,
    pub timestamp: u64,
}

/// Parses a single line protocol message with an integer `value` field, panicking on anything malformed.
///
/// A backslash escapes the character that follows it. Unescaped commas and spaces end the measurement, unescaped `=`
/// ends a tag key, and unescaped commas and spaces end a tag value. A tag value with an unescaped `=` is malformed.
pub fn parse_line(message: &[u8]) -> Line {
    let text = std::str::from_utf8(message).expect("message should be UTF-8");
    let body = text.strip_suffix('\n').expect("message should end with a newline");
    assert!(!body.contains(['\n', '\r']), "message should be a single line: {:?}", text);

    let mut chars = body.chars();
    let (measurement, mut stop) = read_token(&mut chars, &[',', ' ']);
    assert!(!measurement.is_empty(), "measurement should not be empty: {:?}", text);

    let mut tags = Vec::new();
    while stop == Some(',') {
        let (key, key_stop) = read_token(&mut chars, &['=', ',', ' ']);
        assert_eq!(key_stop, Some('='), "tag key should be followed by '=': {:?}", text);
        assert!(!key.is_empty(), "tag key should not be empty: {:?}", text);

        let (value, value_stop) = read_token(&mut chars, &['=', ',', ' ']);
        assert_ne!(value_stop, Some('='), "tag value has an unescaped '=': {:?}", text);
        assert!(!value.is_empty(), "tag value should not be empty: {:?}", text);

        tags.push((key, value));
        stop = value_stop;
    }
    assert_eq!(stop, Some(' '), "series should be followed by the field set: {:?}", text);

    let (field, timestamp) = chars.as_str().split_once(' ').expect("field set should be followed by a timestamp");
    let value = field.strip_prefix("value=").expect("field should be named value");

    Line {
        measurement,
        tags,
        value: value.parse().expect("value should be an integer"),
        timestamp: timestamp.parse().expect("timestamp should be an integer"),
    }
}

fn read_token(chars: &mut Chars<'_>, stops: &[char]) -> (String, Option<char>) {
    let mut token = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => token.push(chars.next().expect("escape at end of message")),
            c if stops.contains(&c) => return (token, Some(c)),
            c => token.push(c),
        }
    }
    (token, None)
}
