#![forbid(unsafe_code)]

mod scanner;
mod token;

pub use scanner::{LexError, Scanner};
pub use token::{Token, TokenKind};

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Scanner::new(src)
            .lex()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn numbers_keep_their_text() {
        let ks = kinds("u32:0xdead_beef s8:-1 0b1010 42");
        assert_eq!(
            ks,
            vec![
                TokenKind::Ident("u32".into()),
                TokenKind::Colon,
                TokenKind::Number("0xdead_beef".into()),
                TokenKind::Ident("s8".into()),
                TokenKind::Colon,
                TokenKind::Minus,
                TokenKind::Number("1".into()),
                TokenKind::Number("0b1010".into()),
                TokenKind::Number("42".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn rejects_bad_radix() {
        let err = Scanner::new("let x = 0b102;").lex().unwrap_err();
        assert!(err.message.contains("radix"), "{}", err.message);
        assert_eq!(err.span.offset(), 8);
        assert_eq!(err.span.len(), 5);

        let err = Scanner::new("0xg1").lex().unwrap_err();
        assert!(err.message.contains("invalid numeric literal"));
    }

    #[test]
    fn multi_char_operators() {
        let ks = kinds("a ++ b << c >> d .. e ... x[1+:u8] :: => -> #[test]");
        assert!(ks.contains(&TokenKind::PlusPlus));
        assert!(ks.contains(&TokenKind::Shl));
        assert!(ks.contains(&TokenKind::Shr));
        assert!(ks.contains(&TokenKind::DotDot));
        assert!(ks.contains(&TokenKind::Ellipsis));
        assert!(ks.contains(&TokenKind::PlusColon));
        assert!(ks.contains(&TokenKind::ColonColon));
        assert!(ks.contains(&TokenKind::FatArrow));
        assert!(ks.contains(&TokenKind::Arrow));
        assert!(ks.contains(&TokenKind::HashBracket));
    }

    #[test]
    fn keywords_versus_identifiers() {
        let ks = kinds("fn init in inner proc process");
        assert_eq!(
            ks,
            vec![
                TokenKind::KwFn,
                TokenKind::Ident("init".into()),
                TokenKind::KwIn,
                TokenKind::Ident("inner".into()),
                TokenKind::KwProc,
                TokenKind::Ident("process".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let ks = kinds(r#""a\n\t\"\\\x41\u{42}""#);
        assert_eq!(ks[0], TokenKind::String("a\n\t\"\\AB".into()));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Scanner::new("let s = \"abc;\n").lex().unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.span.offset(), 8);
    }

    #[test]
    fn comments_are_skipped_and_eof_is_reported() {
        let mut scanner = Scanner::new("// nothing here\nx // trailing");
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Ident("x".into()));
        let eof = scanner.next_token().unwrap();
        assert_eq!(eof.kind, TokenKind::Eof);
        assert_eq!(eof.span.offset(), 29);
    }

    #[test]
    fn unknown_symbol() {
        let err = Scanner::new("a @ b").lex().unwrap_err();
        assert!(err.message.contains("`@`"));
    }
}
