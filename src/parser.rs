//! Parser for textual instruction listings
//!
//! Reads back what `Display` for [`Instruction`] prints:
//!
//! ```text
//! listing     := (instruction? NEWLINE)* instruction?
//! instruction := MNEMONIC NUMBER ',' NUMBER dep*
//! dep         := ('push' | 'pop') ':' ENGINE
//! ```

use crate::error::{ScheduleError, ScheduleResult};
use crate::instruction::{
    DependencyFlags, Engine, Instruction, InstructionKind, CONFIG_EX, CONFIG_LD, CONFIG_ST,
};
use crate::lexer::{Lexer, Token};

/// Parse a whole listing
pub fn parse_listing(source: &str) -> ScheduleResult<Vec<Instruction>> {
    ListingParser::new(source)?.parse_listing()
}

/// Parser for instruction listings
pub struct ListingParser<'source> {
    lexer: Lexer<'source>,
    current: Option<Token>,
    line: usize,
}

impl<'source> ListingParser<'source> {
    pub fn new(source: &'source str) -> ScheduleResult<Self> {
        let mut parser = Self {
            lexer: Lexer::new(source),
            current: None,
            line: 1,
        };
        parser.advance()?;
        Ok(parser)
    }

    /// Advance to the next token
    fn advance(&mut self) -> ScheduleResult<Option<Token>> {
        self.line = self.lexer.line();
        let next = match self.lexer.next() {
            Some(Ok(tok)) => Some(tok),
            Some(Err(())) => {
                return Err(ScheduleError::LexerError {
                    line: self.lexer.line(),
                    message: format!("unexpected input '{}'", self.lexer.slice()),
                })
            }
            None => None,
        };
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn error(&self, msg: impl Into<String>) -> ScheduleError {
        ScheduleError::parse(self.line, msg)
    }

    fn describe(&self) -> String {
        match &self.current {
            Some(tok) => format!("'{}'", tok),
            None => "end of input".to_string(),
        }
    }

    fn expect_number(&mut self) -> ScheduleResult<u64> {
        match self.current {
            Some(Token::Number(n)) => {
                self.advance()?;
                Ok(n)
            }
            _ => Err(self.error(format!("expected a number, got {}", self.describe()))),
        }
    }

    fn expect_ident(&mut self) -> ScheduleResult<String> {
        match &self.current {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            _ => Err(self.error(format!("expected a name, got {}", self.describe()))),
        }
    }

    fn expect(&mut self, expected: Token) -> ScheduleResult<()> {
        if self.current.as_ref() == Some(&expected) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', got {}", expected, self.describe())))
        }
    }

    /// Parse every instruction up to end of input
    pub fn parse_listing(&mut self) -> ScheduleResult<Vec<Instruction>> {
        let mut instructions = Vec::new();
        while self.current.is_some() {
            if self.current == Some(Token::Newline) {
                self.advance()?;
                continue;
            }
            instructions.push(self.parse_instruction()?);
            match self.current {
                None | Some(Token::Newline) => {}
                _ => return Err(self.error(format!("unexpected {} after instruction", self.describe()))),
            }
        }
        Ok(instructions)
    }

    /// Parse a single instruction line
    fn parse_instruction(&mut self) -> ScheduleResult<Instruction> {
        let mnemonic = self.expect_ident()?;
        let kind = InstructionKind::from_mnemonic(&mnemonic)
            .ok_or_else(|| self.error(format!("unknown mnemonic '{}'", mnemonic)))?;
        let rs1 = self.expect_number()?;
        self.expect(Token::Comma)?;
        let rs2 = self.expect_number()?;

        let selector = match kind {
            InstructionKind::ConfigureExecute => Some(CONFIG_EX),
            InstructionKind::ConfigureLoad => Some(CONFIG_LD),
            InstructionKind::ConfigureStore => Some(CONFIG_ST),
            _ => None,
        };
        if let Some(selector) = selector {
            if rs1 & 0b11 != selector {
                return Err(self.error(format!(
                    "{} needs configuration selector {}, rs1 has {}",
                    mnemonic,
                    selector,
                    rs1 & 0b11
                )));
            }
        }

        let mut deps = DependencyFlags::NONE;
        while let Some(Token::Ident(_)) = self.current {
            deps = deps | self.parse_dep(kind)?;
        }
        Ok(Instruction { kind, rs1, rs2, deps })
    }

    /// Parse `push:ENGINE` or `pop:ENGINE` for an instruction of `kind`
    fn parse_dep(&mut self, kind: InstructionKind) -> ScheduleResult<DependencyFlags> {
        let direction = self.expect_ident()?;
        self.expect(Token::Colon)?;
        let peer_name = self.expect_ident()?;

        let engine = kind
            .engine()
            .ok_or_else(|| self.error(format!("{} carries no dependency flags", kind.mnemonic())))?;
        let peer = Engine::from_short_name(&peer_name)
            .ok_or_else(|| self.error(format!("unknown engine '{}'", peer_name)))?;
        if peer == engine {
            return Err(self.error(format!("{} cannot signal its own engine", kind.mnemonic())));
        }
        match direction.as_str() {
            "push" => Ok(engine.push(peer)),
            "pop" => Ok(engine.pop(peer)),
            other => Err(self.error(format!("expected push or pop, got '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratchpad::ScratchpadAddress;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_simple_listing() {
        let source = "
            # two instructions
            mvin 0x1000, 0x100000000 push:ex
            compute_preloaded 0x0, 0x80 pop:ld push:st
            fence 0, 0
        ";
        let stream = parse_listing(source).unwrap();
        assert_eq!(stream.len(), 3);
        assert_eq!(stream[0].kind, InstructionKind::MoveIn);
        assert_eq!(stream[0].block_len(), 1);
        assert_eq!(stream[0].deps, Engine::Load.push(Engine::Execute));
        assert_eq!(
            stream[1].deps,
            Engine::Execute.pop(Engine::Load) | Engine::Execute.push(Engine::Store)
        );
        assert_eq!(stream[2].kind, InstructionKind::Fence);
    }

    #[test]
    fn test_display_parses_back() {
        let stream = vec![
            Instruction::configure_load(16).with_deps(Engine::Load.pop(Engine::Execute)),
            Instruction::preload(ScratchpadAddress::GARBAGE, ScratchpadAddress::new(0xC000_0010))
                .with_deps(Engine::Execute.pop(Engine::Load) | Engine::Execute.pop(Engine::Store)),
            Instruction::move_out(0x2000, ScratchpadAddress::new(0x8000_0000))
                .with_deps(Engine::Store.pop(Engine::Execute) | Engine::Store.push(Engine::Load)),
        ];
        let text: String = stream.iter().map(|i| format!("{}\n", i)).collect();
        assert_eq!(parse_listing(&text).unwrap(), stream);
    }

    #[test]
    fn test_unknown_mnemonic_reports_line() {
        let err = parse_listing("fence 0, 0\nwarp 1, 2\n").unwrap_err();
        match err {
            ScheduleError::ParseError { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("warp"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_self_signal_and_bad_selector() {
        assert!(parse_listing("mvin 0, 0 push:ld").is_err());
        assert!(parse_listing("config_st 1, 16").is_err());
        assert!(parse_listing("fence 0, 0 pop:ex").is_err());
    }

    #[test]
    fn test_lexer_error_surfaces() {
        let err = parse_listing("mvin 0, 0 ~").unwrap_err();
        assert!(matches!(err, ScheduleError::LexerError { line: 1, .. }));
    }
}
