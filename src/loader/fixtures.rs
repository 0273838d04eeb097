//! Synthesizes minimal managed images: one `.text` section holding a CLI header
//! and a metadata root with `Module`, `Assembly` and `AssemblyRef` tables.
//!
//! Shared by the unit tests and the command-line integration tests; the includer
//! must have a `Version` with public `major`/`minor`/`build`/`revision` in scope.

use super::Version;

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn put_version(buf: &mut Vec<u8>, v: Version) {
    put_u16(buf, v.major);
    put_u16(buf, v.minor);
    put_u16(buf, v.build);
    put_u16(buf, v.revision);
}

/// Build a PE32 image whose manifest is `name`/`version` and references `refs`.
pub fn image(name: &str, version: Version, refs: &[(&str, Version)]) -> Vec<u8> {
    let refs: Vec<(&str, Version, Option<[u8; 8]>)> =
        refs.iter().map(|&(n, v)| (n, v, None)).collect();
    image_with_tokens(name, version, &refs)
}

pub fn image_with_tokens(
    name: &str,
    version: Version,
    refs: &[(&str, Version, Option<[u8; 8]>)],
) -> Vec<u8> {
    // #Strings
    let mut strings = vec![0u8];
    let mut intern = |s: &str| {
        let idx = strings.len() as u16;
        strings.extend_from_slice(s.as_bytes());
        strings.push(0);
        idx
    };
    let module_name = intern(&format!("{}.dll", name));
    let assembly_name = intern(name);
    let ref_names: Vec<u16> = refs.iter().map(|&(n, _, _)| intern(n)).collect();
    pad4(&mut strings);

    // #Blob
    let mut blobs = vec![0u8];
    let ref_tokens: Vec<u16> = refs
        .iter()
        .map(|(_, _, token)| match token {
            Some(t) => {
                let idx = blobs.len() as u16;
                blobs.push(8);
                blobs.extend_from_slice(t);
                idx
            }
            None => 0,
        })
        .collect();
    pad4(&mut blobs);

    // #~ : Module, Assembly, AssemblyRef
    let mut tables = Vec::new();
    put_u32(&mut tables, 0);
    tables.extend_from_slice(&[2, 0, 0, 1]);
    let valid: u64 = 1 | (1 << 0x20) | if refs.is_empty() { 0 } else { 1 << 0x23 };
    tables.extend_from_slice(&valid.to_le_bytes());
    tables.extend_from_slice(&0u64.to_le_bytes());
    put_u32(&mut tables, 1);
    put_u32(&mut tables, 1);
    if !refs.is_empty() {
        put_u32(&mut tables, refs.len() as u32);
    }
    // Module row
    put_u16(&mut tables, 0);
    put_u16(&mut tables, module_name);
    put_u16(&mut tables, 0);
    put_u16(&mut tables, 0);
    put_u16(&mut tables, 0);
    // Assembly row
    put_u32(&mut tables, 0x8004);
    put_version(&mut tables, version);
    put_u32(&mut tables, 0);
    put_u16(&mut tables, 0);
    put_u16(&mut tables, assembly_name);
    put_u16(&mut tables, 0);
    // AssemblyRef rows
    for (i, (_, v, _)) in refs.iter().enumerate() {
        put_version(&mut tables, *v);
        put_u32(&mut tables, 0);
        put_u16(&mut tables, ref_tokens[i]);
        put_u16(&mut tables, ref_names[i]);
        put_u16(&mut tables, 0);
        put_u16(&mut tables, 0);
    }
    pad4(&mut tables);

    // Metadata root
    let header_len = 16 + 12 + 4 + 12 + 20 + 16;
    let tables_off = header_len;
    let strings_off = tables_off + tables.len();
    let blobs_off = strings_off + strings.len();
    let mut md = Vec::new();
    put_u32(&mut md, 0x424A_5342);
    put_u16(&mut md, 1);
    put_u16(&mut md, 1);
    put_u32(&mut md, 0);
    put_u32(&mut md, 12);
    md.extend_from_slice(b"v4.0.30319\0\0");
    put_u16(&mut md, 0);
    put_u16(&mut md, 3);
    put_u32(&mut md, tables_off as u32);
    put_u32(&mut md, tables.len() as u32);
    md.extend_from_slice(b"#~\0\0");
    put_u32(&mut md, strings_off as u32);
    put_u32(&mut md, strings.len() as u32);
    md.extend_from_slice(b"#Strings\0\0\0\0");
    put_u32(&mut md, blobs_off as u32);
    put_u32(&mut md, blobs.len() as u32);
    md.extend_from_slice(b"#Blob\0\0\0");
    assert_eq!(md.len(), header_len);
    md.extend_from_slice(&tables);
    md.extend_from_slice(&strings);
    md.extend_from_slice(&blobs);

    // .text section: CLI header followed by metadata
    const SECTION_RVA: u32 = 0x2000;
    const SECTION_RAW: u32 = 0x200;
    let mut text = Vec::new();
    put_u32(&mut text, 72);
    put_u16(&mut text, 2);
    put_u16(&mut text, 5);
    put_u32(&mut text, SECTION_RVA + 72);
    put_u32(&mut text, md.len() as u32);
    text.resize(72, 0);
    text.extend_from_slice(&md);

    let mut img = vec![0u8; 0x40];
    img[0] = b'M';
    img[1] = b'Z';
    img[0x3C..0x40].copy_from_slice(&0x40u32.to_le_bytes());
    img.extend_from_slice(b"PE\0\0");
    // COFF header
    put_u16(&mut img, 0x14C);
    put_u16(&mut img, 1);
    put_u32(&mut img, 0);
    put_u32(&mut img, 0);
    put_u32(&mut img, 0);
    put_u16(&mut img, 0xE0);
    put_u16(&mut img, 0x2102);
    // PE32 optional header: 96 bytes of fields, then 16 data directories
    let optional = img.len();
    put_u16(&mut img, 0x10B);
    img.resize(optional + 92, 0);
    put_u32(&mut img, 16);
    for dir in 0..16 {
        if dir == 14 {
            put_u32(&mut img, SECTION_RVA);
            put_u32(&mut img, 72);
        } else {
            put_u32(&mut img, 0);
            put_u32(&mut img, 0);
        }
    }
    assert_eq!(img.len(), optional + 0xE0);
    // Section table
    img.extend_from_slice(b".text\0\0\0");
    put_u32(&mut img, text.len() as u32);
    put_u32(&mut img, SECTION_RVA);
    put_u32(&mut img, text.len() as u32);
    put_u32(&mut img, SECTION_RAW);
    img.resize(img.len() + 16, 0);

    img.resize(SECTION_RAW as usize, 0);
    img.extend_from_slice(&text);
    img
}
