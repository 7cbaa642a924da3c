//! 파이썬 리터럴 형식 파서
//!
//! 레거시 노드가 `str(dict)` 형태로 보내는 메시지 허용용
//! - 작은따옴표 문자열
//! - `True` / `False` / `None`
//! - 튜플 (배열로 변환), 후행 쉼표

use serde_json::{Map, Number, Value};

/// 최대 중첩 깊이 (dict / 리스트 / 튜플)
const MAX_DEPTH: usize = 128;

/// 리터럴 문자열을 JSON 값으로 변환
///
/// 전체 입력이 하나의 값이 아니면 `None`
pub fn parse(input: &str) -> Option<Value> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        depth: 0,
    };

    let value = parser.value()?;
    parser.skip_ws();

    if parser.pos == parser.chars.len() {
        Some(value)
    } else {
        None
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// 공백 건너뛰고 기대 문자면 소비
    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            '{' => self.nested(Self::dict),
            '[' => self.nested(|p| p.sequence(']')),
            '(' => self.nested(|p| p.sequence(')')),
            '\'' | '"' => self.string().map(Value::String),
            c if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.number(),
            c if c.is_alphabetic() => self.keyword(),
            _ => None,
        }
    }

    /// 깊이 한도 안에서 컨테이너 파싱
    fn nested<F>(&mut self, parse: F) -> Option<Value>
    where
        F: FnOnce(&mut Self) -> Option<Value>,
    {
        if self.depth >= MAX_DEPTH {
            return None;
        }

        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn dict(&mut self) -> Option<Value> {
        self.bump();
        let mut map = Map::new();

        loop {
            if self.eat('}') {
                return Some(Value::Object(map));
            }

            // JSON 키는 문자열만 가능
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => return None,
            };

            if !self.eat(':') {
                return None;
            }

            let value = self.value()?;
            map.insert(key, value);

            if !self.eat(',') {
                return self.eat('}').then_some(Value::Object(map));
            }
        }
    }

    fn sequence(&mut self, close: char) -> Option<Value> {
        self.bump();
        let mut items = Vec::new();

        loop {
            if self.eat(close) {
                return Some(Value::Array(items));
            }

            items.push(self.value()?);

            if !self.eat(',') {
                return self.eat(close).then_some(Value::Array(items));
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();

        loop {
            match self.bump()? {
                c if c == quote => return Some(out),
                '\\' => {
                    let escaped = match self.bump()? {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        'x' => self.hex_escape(2)?,
                        'u' => self.hex_escape(4)?,
                        other => other,
                    };
                    out.push(escaped);
                }
                c => out.push(c),
            }
        }
    }

    fn hex_escape(&mut self, len: usize) -> Option<char> {
        let digits = (0..len)
            .map(|_| self.bump())
            .collect::<Option<String>>()?;
        char::from_u32(u32::from_str_radix(&digits, 16).ok()?)
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_')
        ) {
            self.pos += 1;
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let literal = text.trim_start_matches('+');

        if let Ok(i) = literal.parse::<i64>() {
            return Some(Value::from(i));
        }
        if let Ok(u) = literal.parse::<u64>() {
            return Some(Value::from(u));
        }

        let f = literal.parse::<f64>().ok()?;
        Number::from_f64(f).map(Value::Number)
    }

    fn keyword(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }

        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" => Some(Value::Bool(true)),
            "False" | "false" => Some(Value::Bool(false)),
            "None" | "null" => Some(Value::Null),
            _ => None,
        }
    }
}
