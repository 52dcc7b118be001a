//! Lexer for the `$name` / `$_FUNC(args,...)` expression mini-language used
//! to interpolate variables and call system functions inside command
//! scripts. A small state machine walks the input once; each state decides
//! where the next token boundary is and feeds it to the [`crate::parser::Parser`].

use crate::parser::Parser;
use crate::token::{is_name_char, TokenType, COMMA, LEFT_BRACKET, PREFIX, RIGHT_BRACKET};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Entry,
    Value,
    Prefix,
    Done,
}

struct Lexer {
    input: Vec<char>,
    start: usize,
    pos: usize,
    funcs: u32,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer { input: input.chars().collect(), start: 0, pos: 0, funcs: 0 }
    }

    fn ignore(&mut self) {
        self.start = self.pos;
    }

    fn in_(&mut self) {
        self.funcs += 1;
    }

    fn out(&mut self) {
        self.funcs = self.funcs.saturating_sub(1);
    }

    fn isfunc(&self) -> bool {
        self.funcs > 0
    }

    fn text(&self) -> String {
        self.input[self.start..self.pos].iter().collect()
    }

    fn emit(&mut self, parser: &mut Parser, t: TokenType) {
        let v = self.text();
        parser.interpret(t, v);
        self.start = self.pos;
    }

    fn skip_spaces(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos] == ' ' {
            self.pos += 1;
        }
        self.ignore();
    }

    fn lex_entry(&mut self) -> LexState {
        if self.isfunc() {
            self.skip_spaces();
        }
        if self.pos >= self.input.len() {
            return LexState::Done;
        }
        if self.input[self.pos] == PREFIX {
            self.pos += 1;
            return LexState::Prefix;
        }
        LexState::Value
    }

    fn lex_value(&mut self, parser: &mut Parser) -> LexState {
        loop {
            if self.pos >= self.input.len() {
                self.emit(parser, TokenType::Value);
                return LexState::Done;
            }

            let c = self.input[self.pos];
            if c == PREFIX {
                self.emit(parser, TokenType::Value);
                self.pos += 1;
                return LexState::Prefix;
            }

            if c == RIGHT_BRACKET && self.isfunc() {
                if self.pos > self.start {
                    self.emit(parser, TokenType::Value);
                }
                self.emit(parser, TokenType::EndMethod);
                self.out();
                self.pos += 1;
                self.ignore();
                return LexState::Entry;
            }

            if c == COMMA && self.isfunc() {
                if self.pos > self.start {
                    self.emit(parser, TokenType::Value);
                }
                self.pos += 1;
                self.ignore();
                self.emit(parser, TokenType::EndParam);
                return LexState::Entry;
            }

            self.pos += 1;
        }
    }

    fn lex_prefix(&mut self, parser: &mut Parser) -> LexState {
        loop {
            if self.pos >= self.input.len() {
                if self.pos > self.start {
                    self.emit(parser, TokenType::Variable);
                }
                return LexState::Done;
            }

            let c = self.input[self.pos];
            if is_name_char(c) {
                self.pos += 1;
                continue;
            }

            if self.pos == self.start {
                // A bare '$' with no name following degrades to a literal.
                return LexState::Value;
            }

            if c == LEFT_BRACKET {
                self.emit(parser, TokenType::BeginMethod);
                self.in_();
                self.pos += 1;
                self.ignore();
                return LexState::Entry;
            }

            if c == RIGHT_BRACKET {
                self.emit(parser, TokenType::Variable);
                if self.isfunc() {
                    self.emit(parser, TokenType::EndMethod);
                    self.out();
                    self.pos += 1;
                    self.ignore();
                }
                return LexState::Entry;
            }

            self.emit(parser, TokenType::Variable);
            return LexState::Value;
        }
    }

    fn run(&mut self, parser: &mut Parser) {
        let mut state = LexState::Entry;
        loop {
            state = match state {
                LexState::Entry => self.lex_entry(),
                LexState::Value => self.lex_value(parser),
                LexState::Prefix => self.lex_prefix(parser),
                LexState::Done => break,
            };
        }
    }
}

/// Lex `input`, feeding every token into `parser` in order.
pub fn lex(input: &str, parser: &mut Parser) {
    Lexer::new(input).run(parser);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_has_no_variables() {
        let mut parser = Parser::new();
        lex("hello world", &mut parser);
        let env = crate::env::Env::new();
        assert_eq!(parser.execute(&env), "hello world");
    }

    #[test]
    fn bare_dollar_without_name_is_literal() {
        let mut parser = Parser::new();
        lex("cost: $", &mut parser);
        let env = crate::env::Env::new();
        assert_eq!(parser.execute(&env), "cost: $");
    }
}
