// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;

use super::*;

fn strip(input: &[u8]) -> String {
    AnsiStripper::new().feed(input)
}

#[test]
fn plain_text_passes_through() {
    assert_eq!(strip(b"hello world"), "hello world");
}

#[test]
fn csi_sequences_are_removed() {
    assert_eq!(strip(b"\x1b[31mred\x1b[0m text"), "red text");
    assert_eq!(strip(b"\x1b[2J\x1b[1;1Hcleared"), "cleared");
    // Private-mode CSI with intermediates.
    assert_eq!(strip(b"\x1b[?25lhidden\x1b[?25h"), "hidden");
}

#[test]
fn osc_sequences_are_removed() {
    // BEL-terminated title set.
    assert_eq!(strip(b"\x1b]0;my title\x07after"), "after");
    // ST-terminated.
    assert_eq!(strip(b"\x1b]8;;http://x\x1b\\link"), "link");
}

#[test]
fn keypad_and_charset_codes_are_removed() {
    assert_eq!(strip(b"\x1b=app\x1b>norm"), "appnorm");
    assert_eq!(strip(b"\x1b(Bascii"), "ascii");
}

#[test]
fn control_chars_except_cr_lf_tab_are_removed() {
    assert_eq!(strip(b"a\x00b\x07c\x08d"), "abcd");
    assert_eq!(strip(b"keep\rthese\nthree\there"), "keep\rthese\nthree\there");
}

#[test]
fn c1_controls_are_removed() {
    // U+0085 NEL and U+009B CSI-equivalent as UTF-8.
    assert_eq!(strip("a\u{85}b\u{9b}c".as_bytes()), "abc");
}

#[test]
fn escape_sequence_split_across_chunks() {
    let mut stripper = AnsiStripper::new();
    let mut out = stripper.feed(b"before\x1b[3");
    out.push_str(&stripper.feed(b"1mafter"));
    assert_eq!(out, "beforeafter");
}

#[test]
fn multibyte_char_split_across_chunks() {
    // The prompt glyph U+276F is three UTF-8 bytes.
    let glyph = "\u{276f}".as_bytes();
    let mut stripper = AnsiStripper::new();
    let mut out = stripper.feed(&[b'x', glyph[0]]);
    out.push_str(&stripper.feed(&[glyph[1], glyph[2], b'y']));
    assert_eq!(out, "x\u{276f}y");
}

#[test]
fn invalid_utf8_is_dropped() {
    assert_eq!(strip(b"ok\xff\xfestill ok"), "okstill ok");
}

#[test]
fn normalize_collapses_whitespace() {
    assert_eq!(normalize_line("  a\t\tb   c  "), "a b c");
    assert_eq!(normalize_line(""), "");
    assert_eq!(normalize_line("   "), "");
}

proptest! {
    /// Cleaned output never contains ESC or disallowed control bytes.
    #[test]
    fn no_control_bytes_survive(input in proptest::collection::vec(any::<u8>(), 0..512)) {
        let out = strip(&input);
        for ch in out.chars() {
            prop_assert!(
                !ch.is_control() || ch == '\r' || ch == '\n' || ch == '\t',
                "control char {ch:?} survived"
            );
            prop_assert!(!('\u{80}'..='\u{9f}').contains(&ch), "C1 {ch:?} survived");
        }
    }

    /// Chunked feeding is equivalent to one-shot feeding.
    #[test]
    fn chunking_is_transparent(
        input in proptest::collection::vec(any::<u8>(), 0..256),
        split in 0usize..256,
    ) {
        let whole = strip(&input);
        let cut = split.min(input.len());
        let mut stripper = AnsiStripper::new();
        let mut chunked = stripper.feed(&input[..cut]);
        chunked.push_str(&stripper.feed(&input[cut..]));
        // A trailing incomplete escape or UTF-8 sequence may be withheld in
        // both cases; equality holds because the same state machine ran.
        prop_assert_eq!(whole, chunked);
    }
}
