//! Legacy `.doc` text extraction.
//!
//! Word 97-2003 files are compound (CFB) containers. The main text lives in
//! the `WordDocument` stream as pieces, each either 8-bit cp1252 or UTF-16LE,
//! located through the piece table stored in the `0Table`/`1Table` stream.
//! Anything that does not parse as such a file falls back to a scrape for
//! printable runs.

use std::io::{Cursor, Read};
use tracing::debug;

const WORD_IDENT: u16 = 0xA5EC;
const FIB_FLAGS: usize = 0x000A;
const FIB_CCP_TEXT: usize = 0x004C;
const FIB_FC_CLX: usize = 0x01A2;
const FIB_LCB_CLX: usize = 0x01A6;

const FLAG_ENCRYPTED: u16 = 0x0100;
const FLAG_WHICH_TABLE: u16 = 0x0200;
const FC_COMPRESSED: u32 = 0x4000_0000;

/// Text of a legacy `.doc`, paragraphs separated by blank lines.
pub fn extract(bytes: &[u8]) -> String {
    match read_word97(bytes) {
        Ok(text) => text,
        Err(reason) => {
            debug!("Not a readable Word 97 file ({}); scraping printable runs", reason);
            scrape(bytes)
        }
    }
}

/// Read the main document text through the piece table.
pub fn read_word97(bytes: &[u8]) -> Result<String, String> {
    let mut file = cfb::CompoundFile::open(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let word = read_stream(&mut file, "/WordDocument")?;

    if u16_at(&word, 0)? != WORD_IDENT {
        return Err("WordDocument stream has no Word 97 signature".into());
    }
    let flags = u16_at(&word, FIB_FLAGS)?;
    if flags & FLAG_ENCRYPTED != 0 {
        return Err("document is encrypted".into());
    }
    let table_name = if flags & FLAG_WHICH_TABLE != 0 { "/1Table" } else { "/0Table" };
    let table = read_stream(&mut file, table_name)?;

    let ccp_text = u32_at(&word, FIB_CCP_TEXT)?;
    let fc_clx = u32_at(&word, FIB_FC_CLX)? as usize;
    let lcb_clx = u32_at(&word, FIB_LCB_CLX)? as usize;
    let clx = table
        .get(fc_clx..fc_clx.saturating_add(lcb_clx))
        .ok_or("piece table lies outside the table stream")?;
    let plc = piece_table(clx)?;

    // PlcPcd: n+1 character positions, then n 8-byte piece descriptors.
    if plc.len() < 4 || (plc.len() - 4) % 12 != 0 {
        return Err("malformed piece table".into());
    }
    let pieces = (plc.len() - 4) / 12;

    let mut raw = String::new();
    for i in 0..pieces {
        let cp_start = u32_at(plc, i * 4)?;
        let cp_end = u32_at(plc, (i + 1) * 4)?.min(ccp_text);
        if cp_end <= cp_start {
            continue;
        }
        let len = (cp_end - cp_start) as usize;
        let fc = u32_at(plc, (pieces + 1) * 4 + i * 8 + 2)?;

        if fc & FC_COMPRESSED != 0 {
            let start = ((fc & !FC_COMPRESSED) / 2) as usize;
            let chunk = word
                .get(start..start + len)
                .ok_or("8-bit piece lies outside the document stream")?;
            raw.extend(chunk.iter().map(|&b| cp1252(b)));
        } else {
            let start = fc as usize;
            let chunk = word
                .get(start..start + 2 * len)
                .ok_or("UTF-16 piece lies outside the document stream")?;
            let units = chunk.chunks_exact(2).map(|p| u16::from_le_bytes([p[0], p[1]]));
            raw.extend(char::decode_utf16(units).map(|r| r.unwrap_or('\u{FFFD}')));
        }
    }

    Ok(clean_word_text(&raw))
}

fn read_stream(file: &mut cfb::CompoundFile<Cursor<&[u8]>>, path: &str) -> Result<Vec<u8>, String> {
    let mut stream = file.open_stream(path).map_err(|e| format!("{path}: {e}"))?;
    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .map_err(|e| format!("{path}: {e}"))?;
    Ok(buf)
}

/// Skip the Prc entries of a Clx and return the PlcPcd body.
fn piece_table(clx: &[u8]) -> Result<&[u8], String> {
    let mut pos = 0;
    loop {
        match clx.get(pos) {
            Some(0x01) => pos += 3 + u16_at(clx, pos + 1)? as usize,
            Some(0x02) => {
                let lcb = u32_at(clx, pos + 1)? as usize;
                return clx
                    .get(pos + 5..pos + 5 + lcb)
                    .ok_or_else(|| "truncated piece table".to_string());
            }
            _ => return Err("no piece table in Clx".into()),
        }
    }
}

/// Map Word's in-text control characters onto plain text: paragraph marks
/// and page breaks become blank lines, field instructions are dropped and
/// field results kept.
fn clean_word_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    // One entry per open field: true while still in its instruction part.
    let mut fields: Vec<bool> = Vec::new();

    for ch in raw.chars() {
        match ch {
            '\u{13}' => {
                fields.push(true);
                continue;
            }
            '\u{14}' => {
                if let Some(top) = fields.last_mut() {
                    *top = false;
                }
                continue;
            }
            '\u{15}' => {
                fields.pop();
                continue;
            }
            _ => {}
        }
        if fields.iter().any(|&instr| instr) {
            continue;
        }
        match ch {
            '\r' | '\u{C}' => out.push_str("\n\n"),
            '\u{B}' => out.push('\n'),
            '\u{7}' | '\t' => out.push('\t'),
            c if c.is_control() || c == '\u{FFFD}' => {}
            c => out.push(c),
        }
    }
    out.trim().to_string()
}

fn cp1252(b: u8) -> char {
    const HIGH: [char; 32] = [
        '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8D}', 'Ž',
        '\u{8F}', '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ',
        '\u{9D}', 'ž', 'Ÿ',
    ];
    match b {
        0x80..=0x9F => HIGH[(b - 0x80) as usize],
        _ => b as char,
    }
}

fn u16_at(buf: &[u8], at: usize) -> Result<u16, String> {
    buf.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| format!("read past end at {at:#x}"))
}

fn u32_at(buf: &[u8], at: usize) -> Result<u32, String> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| format!("read past end at {at:#x}"))
}

/// Best-effort text from bytes that are not a Word 97 file: keep runs of
/// printable characters long enough to be prose, drop binary noise.
pub fn scrape(bytes: &[u8]) -> String {
    const MIN_RUN: usize = 4;

    fn flush(run: &mut String, out: &mut String) {
        if run.trim().chars().count() >= MIN_RUN {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(run.trim());
        }
        run.clear();
    }

    let lossy = String::from_utf8_lossy(bytes);
    let mut out = String::new();
    let mut run = String::new();

    for ch in lossy.chars() {
        if ch == '\u{FFFD}' || (ch.is_control() && ch != '\n' && ch != '\t') {
            flush(&mut run, &mut out);
        } else {
            run.push(ch);
        }
    }
    flush(&mut run, &mut out);
    out
}
