//! Property-based tests for the tokenizer, the object parser and the writer

use pdfcheck::parser::{Lexer, ObjectParser, ParseOptions, PdfObject};
use pdfcheck::writer::to_pdf_syntax;
use pdfcheck::Document;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_lexer_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let lexer = Lexer::new(&data);
        let count = lexer.take(data.len() + 1).count();
        prop_assert!(count <= data.len() + 1);
    }

    #[test]
    fn test_lenient_lexer_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Lexer::new(&data).with_lenient(true).take(data.len() + 1).count();
    }

    #[test]
    fn test_object_parser_never_panics(text in "[\\[\\]<>()/ a-z0-9.+\\-RobjendstreamCatalog\n]{0,200}") {
        for fix in [false, true] {
            let options = ParseOptions::default().with_fix(fix);
            let _ = ObjectParser::new(text.as_bytes(), 0, &options).parse_object();
        }
    }

    #[test]
    fn test_document_parse_never_panics(tail in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut data = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n".to_vec();
        data.extend_from_slice(&tail);
        let _ = Document::from_bytes(&data, &ParseOptions::lenient());
        let _ = Document::from_bytes(&data, &ParseOptions::default());
    }

    #[test]
    fn test_integers_render_and_reparse(value in any::<i32>()) {
        let object = PdfObject::Integer(value as i64);
        let text = to_pdf_syntax(&object);
        prop_assert_eq!(PdfObject::parse_bytes(text.as_bytes()).unwrap(), object);
    }

    #[test]
    fn test_reals_render_without_exponent(value in -1.0e9f64..1.0e9) {
        let text = to_pdf_syntax(&PdfObject::Real(value));
        prop_assert!(!text.contains('e') && !text.contains('E'));
        let reparsed = PdfObject::parse_bytes(text.as_bytes()).unwrap();
        let back = match reparsed {
            PdfObject::Real(r) => r,
            PdfObject::Integer(i) => i as f64,
            other => panic!("unexpected {other:?}"),
        };
        prop_assert!((back - value).abs() < 1e-5);
    }

    #[test]
    fn test_names_survive_escaping(name in "[ -~]{1,24}") {
        let object = PdfObject::Name(pdfcheck::parser::PdfName::new(name.clone()));
        let text = to_pdf_syntax(&object);
        prop_assert_eq!(PdfObject::parse_bytes(text.as_bytes()).unwrap(), object);
    }

    #[test]
    fn test_literal_strings_survive_escaping(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let object = PdfObject::String(pdfcheck::parser::PdfString::new(bytes));
        let text = to_pdf_syntax(&object);
        prop_assert_eq!(PdfObject::parse_bytes(text.as_bytes()).unwrap(), object);
    }
}
