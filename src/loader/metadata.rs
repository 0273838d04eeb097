//! Reader for the ECMA-335 metadata embedded in managed PE images.
//!
//! Only what the audit needs is decoded: the `Assembly` row (the module's own
//! identity) and the `AssemblyRef` rows (its declared dependencies). Every table
//! that precedes `AssemblyRef` in the tables stream still has to be sized, so the
//! full column schema for tables `0x00..=0x23` lives here.

use std::path::Path;

use thiserror::Error;

use crate::models::{ModuleDescriptor, ModuleIdentity, ModuleReference, Version};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not a PE image: {0}")]
    NotPe(&'static str),

    #[error("not a managed assembly (no CLI header)")]
    NotManaged,

    #[error("image truncated at offset {0:#x}")]
    Truncated(usize),

    #[error("RVA {0:#x} is not mapped by any section")]
    UnmappedRva(u32),

    #[error("malformed metadata: {0}")]
    Malformed(String),

    #[error("module has no assembly manifest")]
    NoManifest,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, MetadataError>;

const METADATA_SIGNATURE: u32 = 0x424A_5342;
const CLI_HEADER_DIRECTORY: usize = 14;
const ASSEMBLY_REF_FLAG_PUBLIC_KEY: u32 = 0x0001;

const MODULE: usize = 0x00;
const TYPE_REF: usize = 0x01;
const TYPE_DEF: usize = 0x02;
const FIELD: usize = 0x04;
const METHOD_DEF: usize = 0x06;
const PARAM: usize = 0x08;
const INTERFACE_IMPL: usize = 0x09;
const MEMBER_REF: usize = 0x0A;
const DECL_SECURITY: usize = 0x0E;
const STAND_ALONE_SIG: usize = 0x11;
const EVENT: usize = 0x14;
const PROPERTY: usize = 0x17;
const MODULE_REF: usize = 0x1A;
const TYPE_SPEC: usize = 0x1B;
const ASSEMBLY: usize = 0x20;
const ASSEMBLY_REF: usize = 0x23;
const FILE: usize = 0x26;
const EXPORTED_TYPE: usize = 0x27;
const MANIFEST_RESOURCE: usize = 0x28;
const GENERIC_PARAM: usize = 0x2A;
const METHOD_SPEC: usize = 0x2B;
const GENERIC_PARAM_CONSTRAINT: usize = 0x2C;

/// A coded index: tag width plus the tables it may point into.
struct Coded {
    bits: u32,
    tables: &'static [usize],
}

const TYPE_DEF_OR_REF: Coded = Coded {
    bits: 2,
    tables: &[TYPE_DEF, TYPE_REF, TYPE_SPEC],
};
const HAS_CONSTANT: Coded = Coded {
    bits: 2,
    tables: &[FIELD, PARAM, PROPERTY],
};
const HAS_CUSTOM_ATTRIBUTE: Coded = Coded {
    bits: 5,
    tables: &[
        METHOD_DEF,
        FIELD,
        TYPE_REF,
        TYPE_DEF,
        PARAM,
        INTERFACE_IMPL,
        MEMBER_REF,
        MODULE,
        DECL_SECURITY,
        PROPERTY,
        EVENT,
        STAND_ALONE_SIG,
        MODULE_REF,
        TYPE_SPEC,
        ASSEMBLY,
        ASSEMBLY_REF,
        FILE,
        EXPORTED_TYPE,
        MANIFEST_RESOURCE,
        GENERIC_PARAM,
        GENERIC_PARAM_CONSTRAINT,
        METHOD_SPEC,
    ],
};
const HAS_FIELD_MARSHAL: Coded = Coded {
    bits: 1,
    tables: &[FIELD, PARAM],
};
const HAS_DECL_SECURITY: Coded = Coded {
    bits: 2,
    tables: &[TYPE_DEF, METHOD_DEF, ASSEMBLY],
};
const MEMBER_REF_PARENT: Coded = Coded {
    bits: 3,
    tables: &[TYPE_DEF, TYPE_REF, MODULE_REF, METHOD_DEF, TYPE_SPEC],
};
const HAS_SEMANTICS: Coded = Coded {
    bits: 1,
    tables: &[EVENT, PROPERTY],
};
const METHOD_DEF_OR_REF: Coded = Coded {
    bits: 1,
    tables: &[METHOD_DEF, MEMBER_REF],
};
const MEMBER_FORWARDED: Coded = Coded {
    bits: 1,
    tables: &[FIELD, METHOD_DEF],
};
const CUSTOM_ATTRIBUTE_TYPE: Coded = Coded {
    bits: 3,
    tables: &[METHOD_DEF, MEMBER_REF],
};
const RESOLUTION_SCOPE: Coded = Coded {
    bits: 2,
    tables: &[MODULE, MODULE_REF, ASSEMBLY_REF, TYPE_REF],
};

enum Col {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Table(usize),
    CodedIndex(&'static Coded),
}

use Col::*;

/// Column layout of every table up to and including `AssemblyRef`.
fn schema(table: usize) -> Option<&'static [Col]> {
    let cols: &'static [Col] = match table {
        0x00 => &[U16, Str, Guid, Guid, Guid],
        0x01 => &[CodedIndex(&RESOLUTION_SCOPE), Str, Str],
        0x02 => &[
            U32,
            Str,
            Str,
            CodedIndex(&TYPE_DEF_OR_REF),
            Table(FIELD),
            Table(METHOD_DEF),
        ],
        0x03 => &[Table(FIELD)],
        0x04 => &[U16, Str, Blob],
        0x05 => &[Table(METHOD_DEF)],
        0x06 => &[U32, U16, U16, Str, Blob, Table(PARAM)],
        0x07 => &[Table(PARAM)],
        0x08 => &[U16, U16, Str],
        0x09 => &[Table(TYPE_DEF), CodedIndex(&TYPE_DEF_OR_REF)],
        0x0A => &[CodedIndex(&MEMBER_REF_PARENT), Str, Blob],
        // Constant: one-byte type plus one padding byte.
        0x0B => &[U16, CodedIndex(&HAS_CONSTANT), Blob],
        0x0C => &[
            CodedIndex(&HAS_CUSTOM_ATTRIBUTE),
            CodedIndex(&CUSTOM_ATTRIBUTE_TYPE),
            Blob,
        ],
        0x0D => &[CodedIndex(&HAS_FIELD_MARSHAL), Blob],
        0x0E => &[U16, CodedIndex(&HAS_DECL_SECURITY), Blob],
        0x0F => &[U16, U32, Table(TYPE_DEF)],
        0x10 => &[U32, Table(FIELD)],
        0x11 => &[Blob],
        0x12 => &[Table(TYPE_DEF), Table(EVENT)],
        0x13 => &[Table(EVENT)],
        0x14 => &[U16, Str, CodedIndex(&TYPE_DEF_OR_REF)],
        0x15 => &[Table(TYPE_DEF), Table(PROPERTY)],
        0x16 => &[Table(PROPERTY)],
        0x17 => &[U16, Str, Blob],
        0x18 => &[U16, Table(METHOD_DEF), CodedIndex(&HAS_SEMANTICS)],
        0x19 => &[
            Table(TYPE_DEF),
            CodedIndex(&METHOD_DEF_OR_REF),
            CodedIndex(&METHOD_DEF_OR_REF),
        ],
        0x1A => &[Str],
        0x1B => &[Blob],
        0x1C => &[U16, CodedIndex(&MEMBER_FORWARDED), Str, Table(MODULE_REF)],
        0x1D => &[U32, Table(FIELD)],
        0x1E => &[U32, U32],
        0x1F => &[U32],
        0x20 => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        0x21 => &[U32],
        0x22 => &[U32, U32, U32],
        0x23 => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        _ => return None,
    };
    Some(cols)
}

/// Read a module descriptor from a file on disk.
pub fn read_file(path: &Path) -> Result<ModuleDescriptor> {
    let data = std::fs::read(path).map_err(|source| MetadataError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_descriptor(&data)
}

/// Read a module descriptor from the bytes of a managed PE image.
pub fn read_descriptor(data: &[u8]) -> Result<ModuleDescriptor> {
    let image = PeImage::parse(data)?;
    let metadata = image.metadata()?;
    let root = MetadataRoot::parse(metadata)?;
    let tables = TablesStream::parse(root.tables)?;

    if tables.rows[ASSEMBLY] == 0 {
        return Err(MetadataError::NoManifest);
    }

    let mut row = tables.row(ASSEMBLY, 0)?;
    let _hash_alg = row.u32()?;
    let version = row.version()?;
    let _flags = row.u32()?;
    let _public_key = row.index(tables.blob_size)?;
    let name = root.string(row.index(tables.string_size)?)?;
    let culture = root.string(row.index(tables.string_size)?)?;

    let mut dependencies = Vec::new();
    for i in 0..tables.rows[ASSEMBLY_REF] {
        let mut row = tables.row(ASSEMBLY_REF, i)?;
        let version = row.version()?;
        let flags = row.u32()?;
        let key_or_token = root.blob(row.index(tables.blob_size)?)?;
        let ref_name = root.string(row.index(tables.string_size)?)?;
        let ref_culture = root.string(row.index(tables.string_size)?)?;

        // A full public key would need hashing to yield a token; only plain tokens are kept.
        let public_key_token =
            if flags & ASSEMBLY_REF_FLAG_PUBLIC_KEY == 0 && !key_or_token.is_empty() {
                Some(key_or_token.to_vec())
            } else {
                None
            };

        dependencies.push(ModuleReference {
            identity: ModuleIdentity::new(ref_name, version),
            culture: non_empty(ref_culture),
            public_key_token,
        });
    }

    Ok(ModuleDescriptor {
        identity: ModuleIdentity::new(name, version),
        culture: non_empty(culture),
        public_key_token: None,
        dependencies,
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

// ---------------------------------------------------------------------------
// Little-endian readers
// ---------------------------------------------------------------------------

fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(MetadataError::Truncated(offset))
}

fn u16_at(data: &[u8], offset: usize) -> Result<u16> {
    let b = slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32> {
    let b = slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn u64_at(data: &[u8], offset: usize) -> Result<u64> {
    let b = slice(data, offset, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(b);
    Ok(u64::from_le_bytes(buf))
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

// ---------------------------------------------------------------------------
// PE container
// ---------------------------------------------------------------------------

struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_pointer: u32,
}

struct PeImage<'a> {
    data: &'a [u8],
    sections: Vec<Section>,
    cli_rva: u32,
}

impl<'a> PeImage<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        if data.get(0..2) != Some(b"MZ".as_slice()) {
            return Err(MetadataError::NotPe("missing MZ signature"));
        }
        let pe = u32_at(data, 0x3C)? as usize;
        if slice(data, pe, 4)? != b"PE\0\0" {
            return Err(MetadataError::NotPe("missing PE signature"));
        }

        let coff = pe + 4;
        let section_count = u16_at(data, coff + 2)? as usize;
        let optional_size = u16_at(data, coff + 16)? as usize;
        let optional = coff + 20;

        let directories = match u16_at(data, optional)? {
            0x10B => optional + 96,
            0x20B => optional + 112,
            _ => return Err(MetadataError::NotPe("unknown optional header magic")),
        };
        let directory_count = u32_at(data, directories - 4)? as usize;
        if directory_count <= CLI_HEADER_DIRECTORY {
            return Err(MetadataError::NotManaged);
        }
        let cli_rva = u32_at(data, directories + CLI_HEADER_DIRECTORY * 8)?;
        if cli_rva == 0 {
            return Err(MetadataError::NotManaged);
        }

        let table = optional + optional_size;
        let mut sections = Vec::with_capacity(section_count);
        for i in 0..section_count {
            let s = table + i * 40;
            sections.push(Section {
                virtual_size: u32_at(data, s + 8)?,
                virtual_address: u32_at(data, s + 12)?,
                raw_size: u32_at(data, s + 16)?,
                raw_pointer: u32_at(data, s + 20)?,
            });
        }

        Ok(PeImage {
            data,
            sections,
            cli_rva,
        })
    }

    fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        self.sections
            .iter()
            .find(|s| {
                let extent = s.virtual_size.max(s.raw_size);
                rva >= s.virtual_address && rva - s.virtual_address < extent
            })
            .and_then(|s| {
                (s.raw_pointer as usize).checked_add((rva - s.virtual_address) as usize)
            })
            .ok_or(MetadataError::UnmappedRva(rva))
    }

    /// The metadata blob referenced by the CLI header.
    fn metadata(&self) -> Result<&'a [u8]> {
        let cli = self.rva_to_offset(self.cli_rva)?;
        let rva = u32_at(self.data, cli.saturating_add(8))?;
        let size = u32_at(self.data, cli.saturating_add(12))? as usize;
        let offset = self.rva_to_offset(rva)?;
        slice(self.data, offset, size)
    }
}

// ---------------------------------------------------------------------------
// Metadata root and heaps
// ---------------------------------------------------------------------------

struct MetadataRoot<'a> {
    tables: &'a [u8],
    strings: &'a [u8],
    blobs: &'a [u8],
}

impl<'a> MetadataRoot<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        if u32_at(data, 0)? != METADATA_SIGNATURE {
            return Err(MetadataError::Malformed("bad metadata signature".into()));
        }
        let version_len = u32_at(data, 12)? as usize;
        let after_version = 16 + align4(version_len);
        let stream_count = u16_at(data, after_version + 2)?;

        let mut tables = None;
        let mut strings: &[u8] = &[];
        let mut blobs: &[u8] = &[];

        let mut pos = after_version + 4;
        for _ in 0..stream_count {
            let offset = u32_at(data, pos)? as usize;
            let size = u32_at(data, pos + 4)? as usize;
            let name_start = pos + 8;
            let name_len = data
                .get(name_start..)
                .and_then(|rest| rest.iter().position(|&b| b == 0))
                .ok_or(MetadataError::Truncated(name_start))?;
            let name = &data[name_start..name_start + name_len];
            pos = name_start + align4(name_len + 1);

            let body = slice(data, offset, size)?;
            match name {
                b"#~" | b"#-" => tables = Some(body),
                b"#Strings" => strings = body,
                b"#Blob" => blobs = body,
                _ => {}
            }
        }

        let tables =
            tables.ok_or_else(|| MetadataError::Malformed("no tables stream".into()))?;
        Ok(MetadataRoot {
            tables,
            strings,
            blobs,
        })
    }

    fn string(&self, index: u32) -> Result<String> {
        let start = index as usize;
        let rest = self
            .strings
            .get(start..)
            .ok_or_else(|| MetadataError::Malformed(format!("string index {:#x} out of range", index)))?;
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| MetadataError::Malformed("unterminated string".into()))?;
        String::from_utf8(rest[..end].to_vec())
            .map_err(|_| MetadataError::Malformed("string heap is not UTF-8".into()))
    }

    fn blob(&self, index: u32) -> Result<&'a [u8]> {
        let start = index as usize;
        let first = *self
            .blobs
            .get(start)
            .ok_or_else(|| MetadataError::Malformed(format!("blob index {:#x} out of range", index)))?;
        // ECMA-335 II.24.2.4 compressed length prefix.
        let (len, header) = if first & 0x80 == 0 {
            (first as usize, 1)
        } else if first & 0xC0 == 0x80 {
            let b = slice(self.blobs, start, 2)?;
            ((((b[0] & 0x3F) as usize) << 8) | b[1] as usize, 2)
        } else if first & 0xE0 == 0xC0 {
            let b = slice(self.blobs, start, 4)?;
            let len = (((b[0] & 0x1F) as usize) << 24)
                | ((b[1] as usize) << 16)
                | ((b[2] as usize) << 8)
                | b[3] as usize;
            (len, 4)
        } else {
            return Err(MetadataError::Malformed("bad blob length prefix".into()));
        };
        slice(self.blobs, start + header, len)
    }
}

// ---------------------------------------------------------------------------
// Tables stream
// ---------------------------------------------------------------------------

struct TablesStream<'a> {
    data: &'a [u8],
    rows: [u32; 64],
    offsets: [usize; ASSEMBLY_REF + 1],
    row_sizes: [usize; ASSEMBLY_REF + 1],
    string_size: usize,
    blob_size: usize,
}

impl<'a> TablesStream<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        let heap_sizes = *data.get(6).ok_or(MetadataError::Truncated(6))?;
        let valid = u64_at(data, 8)?;

        let mut rows = [0u32; 64];
        let mut pos = 24;
        for (table, count) in rows.iter_mut().enumerate() {
            if valid & (1u64 << table) != 0 {
                *count = u32_at(data, pos)?;
                pos += 4;
            }
        }
        // Extra data flag.
        if heap_sizes & 0x40 != 0 {
            pos += 4;
        }

        let string_size = if heap_sizes & 0x01 != 0 { 4 } else { 2 };
        let guid_size = if heap_sizes & 0x02 != 0 { 4 } else { 2 };
        let blob_size = if heap_sizes & 0x04 != 0 { 4 } else { 2 };

        let mut offsets = [0usize; ASSEMBLY_REF + 1];
        let mut row_sizes = [0usize; ASSEMBLY_REF + 1];
        for table in 0..=ASSEMBLY_REF {
            let cols = schema(table)
                .ok_or_else(|| MetadataError::Malformed(format!("unknown table {:#x}", table)))?;
            let size: usize = cols
                .iter()
                .map(|col| match col {
                    U16 => 2,
                    U32 => 4,
                    Str => string_size,
                    Guid => guid_size,
                    Blob => blob_size,
                    Table(t) => {
                        if rows[*t] < 0x1_0000 {
                            2
                        } else {
                            4
                        }
                    }
                    CodedIndex(c) => coded_size(c, &rows),
                })
                .sum();
            row_sizes[table] = size;
            offsets[table] = pos;
            pos = size
                .checked_mul(rows[table] as usize)
                .and_then(|span| pos.checked_add(span))
                .ok_or(MetadataError::Truncated(pos))?;
        }
        // Row counts come straight from the file; every row read later must lie inside the stream.
        if pos > data.len() {
            return Err(MetadataError::Truncated(data.len()));
        }

        Ok(TablesStream {
            data,
            rows,
            offsets,
            row_sizes,
            string_size,
            blob_size,
        })
    }

    fn row(&self, table: usize, index: u32) -> Result<Row<'a>> {
        let start = self.row_sizes[table]
            .checked_mul(index as usize)
            .and_then(|n| n.checked_add(self.offsets[table]))
            .ok_or(MetadataError::Truncated(self.offsets[table]))?;
        Ok(Row {
            data: slice(self.data, start, self.row_sizes[table])?,
            pos: 0,
        })
    }
}

fn coded_size(coded: &Coded, rows: &[u32; 64]) -> usize {
    let max = coded.tables.iter().map(|&t| rows[t]).max().unwrap_or(0);
    if max < (1u32 << (16 - coded.bits)) {
        2
    } else {
        4
    }
}

struct Row<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Row<'_> {
    fn u16(&mut self) -> Result<u16> {
        let v = u16_at(self.data, self.pos)?;
        self.pos += 2;
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32> {
        let v = u32_at(self.data, self.pos)?;
        self.pos += 4;
        Ok(v)
    }

    fn index(&mut self, size: usize) -> Result<u32> {
        if size == 2 {
            self.u16().map(u32::from)
        } else {
            self.u32()
        }
    }

    fn version(&mut self) -> Result<Version> {
        Ok(Version::new(self.u16()?, self.u16()?, self.u16()?, self.u16()?))
    }
}

#[cfg(test)]
#[path = "fixtures.rs"]
pub(crate) mod fixtures;
