use std::io::Read;

use objwire_bytes::{varint, InputCursor, Tag, WireError};
use tracing::warn;

use crate::cmd::DumpArgs;
use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_node, OutputFormat, WireNode};

/// Structural parsing needs no registry, so depth is bounded here rather
/// than by a codec config.
const MAX_DUMP_DEPTH: usize = 128;

pub fn run(args: DumpArgs, format: OutputFormat) -> CliResult<i32> {
    let raw = read_input(&args)?;
    let bytes = if args.hex { parse_hex(&raw)? } else { raw };

    let mut parser = WireParser::new(&bytes);
    let node = parser.parse_value(0)?;
    let trailing = parser.remaining();
    if trailing > 0 {
        warn!(trailing, "input continues past the first top-level value");
    }
    print_node(&node, format);
    Ok(SUCCESS)
}

fn read_input(args: &DumpArgs) -> CliResult<Vec<u8>> {
    if args.input.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|err| io_error("reading stdin", err))?;
        Ok(buf)
    } else {
        std::fs::read(&args.input)
            .map_err(|err| io_error(&format!("reading {}", args.input.display()), err))
    }
}

fn parse_hex(raw: &[u8]) -> CliResult<Vec<u8>> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| CliError::new(USAGE, "hex input is not valid text"))?;
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "hex input has an odd number of digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex at position {i}")))
        })
        .collect()
}

/// Registry-free parser over the tag structure: every value is
/// self-describing enough to walk, even when its type ids are unknown.
struct WireParser<'a> {
    cur: InputCursor<'a>,
    strings: Vec<String>,
    next_ref_id: u64,
}

impl<'a> WireParser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            cur: InputCursor::new(bytes),
            strings: Vec::new(),
            next_ref_id: 1,
        }
    }

    fn remaining(&self) -> usize {
        self.cur.remaining()
    }

    fn parse_value(&mut self, depth: usize) -> CliResult<WireNode> {
        if depth > MAX_DUMP_DEPTH {
            return Err(CliError::new(
                DATA_INVALID,
                format!("nesting deeper than {MAX_DUMP_DEPTH} levels"),
            ));
        }
        let offset = self.cur.position();
        let byte = self.cur.read_u8().map_err(wire_error)?;
        let tag = Tag::from_byte(byte).ok_or_else(|| {
            CliError::new(
                DATA_INVALID,
                format!("invalid tag byte 0x{byte:02X} at offset {offset}"),
            )
        })?;

        match tag {
            Tag::Null => Ok(WireNode::leaf(offset, "null")),
            Tag::True => Ok(WireNode::leaf(offset, "true")),
            Tag::False => Ok(WireNode::leaf(offset, "false")),
            Tag::Byte => {
                let value = self.cur.read_u8().map_err(wire_error)? as i8;
                Ok(WireNode::leaf(offset, format!("byte {value}")))
            }
            Tag::Short => {
                let value = varint::read_ivarint(&mut self.cur).map_err(wire_error)?;
                Ok(WireNode::leaf(offset, format!("short {value}")))
            }
            Tag::IntPos => {
                let value = self.read_uvarint()?;
                Ok(WireNode::leaf(offset, format!("int {value}")))
            }
            Tag::IntNeg => {
                let value = self.read_uvarint()?;
                Ok(WireNode::leaf(offset, format!("int -{value}")))
            }
            Tag::LongPos => {
                let value = self.read_uvarint()?;
                Ok(WireNode::leaf(offset, format!("long {value}")))
            }
            Tag::LongNeg => {
                let value = self.read_uvarint()?;
                Ok(WireNode::leaf(offset, format!("long -{value}")))
            }
            Tag::Float => {
                let bits = self.cur.read_slice(4).map_err(wire_error)?;
                let value = f32::from_le_bytes(bits.try_into().expect("4 bytes"));
                Ok(WireNode::leaf(offset, format!("float {value}")))
            }
            Tag::Double => {
                let bits = self.cur.read_slice(8).map_err(wire_error)?;
                let value = f64::from_le_bytes(bits.try_into().expect("8 bytes"));
                Ok(WireNode::leaf(offset, format!("double {value}")))
            }
            Tag::String => {
                let len = self.read_len()?;
                let raw = self.cur.read_slice(len).map_err(wire_error)?;
                let text = String::from_utf8_lossy(raw).into_owned();
                self.strings.push(text.clone());
                let id = self.strings.len();
                Ok(WireNode::leaf(offset, format!("string #{id} {text:?}")))
            }
            Tag::StringRef => {
                let id = self.read_uvarint()?;
                let label = match usize::try_from(id)
                    .ok()
                    .and_then(|id| id.checked_sub(1))
                    .and_then(|i| self.strings.get(i))
                {
                    Some(text) => format!("string-ref #{id} {text:?}"),
                    None => format!("string-ref #{id} <unknown>"),
                };
                Ok(WireNode::leaf(offset, label))
            }
            Tag::Array | Tag::List => {
                let ref_id = self.claim_ref_id();
                let elem = self.read_uvarint()?;
                let len = self.read_len()?;
                let name = if tag == Tag::Array { "array" } else { "list" };
                let mut node = WireNode::leaf(
                    offset,
                    format!("{name} #{ref_id} elem={} len={len}", code_name(elem)),
                );
                for _ in 0..len {
                    let child = self.parse_value(depth + 1)?;
                    node.children.push(child);
                }
                Ok(node)
            }
            Tag::Map => {
                let ref_id = self.claim_ref_id();
                let key = self.read_uvarint()?;
                let value = self.read_uvarint()?;
                let len = self.read_len()?;
                let mut node = WireNode::leaf(
                    offset,
                    format!(
                        "map #{ref_id} key={} val={} len={len}",
                        code_name(key),
                        code_name(value)
                    ),
                );
                for _ in 0..len {
                    node.children.push(self.parse_value(depth + 1)?);
                    node.children.push(self.parse_value(depth + 1)?);
                }
                Ok(node)
            }
            Tag::Object => {
                let ref_id = self.claim_ref_id();
                let type_id = self.read_uvarint()?;
                let count = self.read_len()?;
                let mut node = WireNode::leaf(
                    offset,
                    format!("object #{ref_id} type={type_id} fields={count}"),
                );
                for _ in 0..count {
                    node.children.push(self.parse_value(depth + 1)?);
                }
                Ok(node)
            }
            Tag::Enum => {
                let type_id = self.read_uvarint()?;
                let ordinal = self.read_uvarint()?;
                Ok(WireNode::leaf(
                    offset,
                    format!("enum type={type_id} ordinal={ordinal}"),
                ))
            }
            Tag::Ref => {
                let id = self.read_uvarint()?;
                Ok(WireNode::leaf(offset, format!("ref #{id}")))
            }
        }
    }

    fn claim_ref_id(&mut self) -> u64 {
        let id = self.next_ref_id;
        self.next_ref_id += 1;
        id
    }

    fn read_uvarint(&mut self) -> CliResult<u64> {
        varint::read_uvarint(&mut self.cur).map_err(wire_error)
    }

    fn read_len(&mut self) -> CliResult<usize> {
        let len = self.read_uvarint()?;
        usize::try_from(len)
            .map_err(|_| CliError::new(DATA_INVALID, format!("length {len} out of range")))
    }
}

fn code_name(code: u64) -> String {
    match code {
        0 => "dynamic".to_string(),
        1 => "bool".to_string(),
        2 => "byte".to_string(),
        3 => "short".to_string(),
        4 => "int".to_string(),
        5 => "long".to_string(),
        6 => "float".to_string(),
        7 => "double".to_string(),
        8 => "string".to_string(),
        other => format!("#{other}"),
    }
}

fn wire_error(err: WireError) -> CliError {
    CliError::new(DATA_INVALID, err.to_string())
}
