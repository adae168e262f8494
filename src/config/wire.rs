//! Binary wire format for [`ConfigNode`] trees.
//!
//! Each node starts with a one-byte tag followed by a fixed-width
//! little-endian payload:
//!
//! | tag | node | payload |
//! |---|---|---|
//! | 1 | Dict | `u32` count, then per entry `u32` key length, key bytes, nested node |
//! | 2 | Array | `u32` count, then nested nodes |
//! | 3 | Int | `i64` |
//! | 4 | String | `u32` length, bytes |
//! | 5 | Float | `f64` |
//! | 6 | Bool true | — |
//! | 7 | Bool false | — |
//!
//! Containers are capped at [`MAX_CONTAINER_LEN`] entries and strings at
//! [`MAX_STRING_LEN`] bytes on both the encode and decode paths, bounding the
//! work a peer can force on the parser.

use std::io::{Read, Write};

use super::{ConfigError, ConfigNode};

const TAG_DICT: u8 = 1;
const TAG_ARRAY: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_BOOL_TRUE: u8 = 6;
const TAG_BOOL_FALSE: u8 = 7;

/// Maximum number of entries in a serialized dict or array.
pub const MAX_CONTAINER_LEN: usize = 2048;
/// Maximum byte length of a serialized string or dict key.
pub const MAX_STRING_LEN: usize = 1024 * 1024;

const MAX_DEPTH: usize = 64;

/// Serialize `node` onto `out`.
pub fn write_node<W: Write>(out: &mut W, node: &ConfigNode) -> Result<(), ConfigError> {
    match node {
        ConfigNode::Dict(entries) => {
            if entries.len() > MAX_CONTAINER_LEN {
                return Err(ConfigError::TooLarge("dict entry count"));
            }
            write_bytes(out, &[TAG_DICT])?;
            write_bytes(out, &(entries.len() as u32).to_le_bytes())?;
            for (key, value) in entries {
                if key.len() > MAX_STRING_LEN {
                    return Err(ConfigError::TooLarge("dict key length"));
                }
                write_bytes(out, &(key.len() as u32).to_le_bytes())?;
                write_bytes(out, key.as_bytes())?;
                write_node(out, value)?;
            }
            Ok(())
        }
        ConfigNode::Array(items) => {
            if items.len() > MAX_CONTAINER_LEN {
                return Err(ConfigError::TooLarge("array entry count"));
            }
            write_bytes(out, &[TAG_ARRAY])?;
            write_bytes(out, &(items.len() as u32).to_le_bytes())?;
            for item in items {
                write_node(out, item)?;
            }
            Ok(())
        }
        ConfigNode::Int(i) => {
            write_bytes(out, &[TAG_INT])?;
            write_bytes(out, &i.to_le_bytes())
        }
        ConfigNode::Float(f) => {
            write_bytes(out, &[TAG_FLOAT])?;
            write_bytes(out, &f.to_le_bytes())
        }
        ConfigNode::Str(s) => {
            if s.len() > MAX_STRING_LEN {
                return Err(ConfigError::TooLarge("string length"));
            }
            write_bytes(out, &[TAG_STRING])?;
            write_bytes(out, &(s.len() as u32).to_le_bytes())?;
            write_bytes(out, s.as_bytes())
        }
        ConfigNode::Bool(true) => write_bytes(out, &[TAG_BOOL_TRUE]),
        ConfigNode::Bool(false) => write_bytes(out, &[TAG_BOOL_FALSE]),
    }
}

/// Serialize `node` into a fresh buffer.
pub fn encode(node: &ConfigNode) -> Result<Vec<u8>, ConfigError> {
    let mut out = Vec::new();
    write_node(&mut out, node)?;
    Ok(out)
}

/// Deserialize one node from `input`.
pub fn read_node<R: Read>(input: &mut R) -> Result<ConfigNode, ConfigError> {
    read_node_at(input, 0)
}

/// Deserialize one node from a byte slice, requiring full consumption.
pub fn decode(mut bytes: &[u8]) -> Result<ConfigNode, ConfigError> {
    let node = read_node(&mut bytes)?;
    if !bytes.is_empty() {
        return Err(ConfigError::Malformed("trailing bytes"));
    }
    Ok(node)
}

fn read_node_at<R: Read>(input: &mut R, depth: usize) -> Result<ConfigNode, ConfigError> {
    if depth > MAX_DEPTH {
        return Err(ConfigError::TooLarge("nesting depth"));
    }

    match read_u8(input)? {
        TAG_DICT => {
            let count = read_len(input, MAX_CONTAINER_LEN, "dict entry count")?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key_len = read_len(input, MAX_STRING_LEN, "dict key length")?;
                let key = read_string(input, key_len)?;
                let value = read_node_at(input, depth + 1)?;
                entries.push((key, value));
            }
            Ok(ConfigNode::Dict(entries))
        }
        TAG_ARRAY => {
            let count = read_len(input, MAX_CONTAINER_LEN, "array entry count")?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_node_at(input, depth + 1)?);
            }
            Ok(ConfigNode::Array(items))
        }
        TAG_INT => {
            let mut buf = [0u8; 8];
            read_bytes(input, &mut buf)?;
            Ok(ConfigNode::Int(i64::from_le_bytes(buf)))
        }
        TAG_FLOAT => {
            let mut buf = [0u8; 8];
            read_bytes(input, &mut buf)?;
            Ok(ConfigNode::Float(f64::from_le_bytes(buf)))
        }
        TAG_STRING => {
            let len = read_len(input, MAX_STRING_LEN, "string length")?;
            Ok(ConfigNode::Str(read_string(input, len)?))
        }
        TAG_BOOL_TRUE => Ok(ConfigNode::Bool(true)),
        TAG_BOOL_FALSE => Ok(ConfigNode::Bool(false)),
        _ => Err(ConfigError::Malformed("unknown node tag")),
    }
}

fn write_bytes<W: Write>(out: &mut W, bytes: &[u8]) -> Result<(), ConfigError> {
    out.write_all(bytes)
        .map_err(|_| ConfigError::Malformed("write failed"))
}

fn read_bytes<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<(), ConfigError> {
    input
        .read_exact(buf)
        .map_err(|_| ConfigError::Malformed("truncated node"))
}

fn read_u8<R: Read>(input: &mut R) -> Result<u8, ConfigError> {
    let mut buf = [0u8; 1];
    read_bytes(input, &mut buf)?;
    Ok(buf[0])
}

fn read_len<R: Read>(input: &mut R, max: usize, what: &'static str) -> Result<usize, ConfigError> {
    let mut buf = [0u8; 4];
    read_bytes(input, &mut buf)?;
    let len = u32::from_le_bytes(buf) as usize;
    if len > max {
        return Err(ConfigError::TooLarge(what));
    }
    Ok(len)
}

fn read_string<R: Read>(input: &mut R, len: usize) -> Result<String, ConfigError> {
    let mut buf = vec![0u8; len];
    read_bytes(input, &mut buf)?;
    String::from_utf8(buf).map_err(|_| ConfigError::Malformed("invalid utf-8 string"))
}
