//! ABI-driven decoding of binary action payloads into JSON values.

use chrono::DateTime;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::abi::{AbiDef, StructDef, VariantDef};
use crate::asset::{Asset, Symbol, SymbolCode};
use crate::bytes::ByteReader;
use crate::crypto::{PublicKey, Signature};
use crate::error::{CoreError, Result};
use crate::name::Name;

/// Bound on typedef chains; a longer chain is treated as a cycle.
const MAX_TYPEDEF_DEPTH: usize = 16;
/// Bound on value nesting (structs, arrays, variants).
const MAX_NESTING: usize = 32;

/// Replaces the default decoder for a named type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialUnpack {
    /// Read a `bytes` value and decode its contents as a nested binary
    /// [`AbiDef`]. Used for the system account's `setabi.abi` field so the
    /// stored document carries the structured definition rather than a blob.
    AbiDefBytes,
}

/// A compiled ABI: lookup tables plus a per-call decode time budget.
pub struct AbiSerializer {
    typedefs: HashMap<String, String>,
    structs: HashMap<String, StructDef>,
    variants: HashMap<String, VariantDef>,
    actions: HashMap<Name, String>,
    special: HashMap<String, SpecialUnpack>,
    max_time: Duration,
}

struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    fn new(limit: Duration) -> Self {
        Self { start: Instant::now(), limit }
    }

    fn check(&self) -> Result<()> {
        if self.start.elapsed() > self.limit {
            return Err(CoreError::DecodeTimeout(self.limit));
        }
        Ok(())
    }
}

impl AbiSerializer {
    /// Compile `abi` into lookup tables. `max_time` bounds every subsequent
    /// decode call.
    pub fn new(abi: &AbiDef, max_time: Duration) -> Self {
        let typedefs = abi
            .types
            .iter()
            .map(|t| (t.new_type_name.clone(), t.type_.clone()))
            .collect();
        let structs = abi
            .structs
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();
        let variants = abi
            .variants
            .iter()
            .map(|v| (v.name.clone(), v.clone()))
            .collect();
        let actions = abi
            .actions
            .iter()
            .map(|a| (a.name, a.type_.clone()))
            .collect();
        Self {
            typedefs,
            structs,
            variants,
            actions,
            special: HashMap::new(),
            max_time,
        }
    }

    /// Register a specialized decoder for `type_name`.
    pub fn with_special(mut self, type_name: &str, hook: SpecialUnpack) -> Self {
        self.special.insert(type_name.to_string(), hook);
        self
    }

    /// The payload struct type of `action`, if the ABI defines it.
    pub fn action_type(&self, action: Name) -> Option<&str> {
        self.actions.get(&action).map(String::as_str)
    }

    /// Decode the payload of `action` into a JSON value.
    pub fn unpack_action_data(&self, action: Name, data: &[u8]) -> Result<Value> {
        let type_name = self
            .actions
            .get(&action)
            .ok_or_else(|| CoreError::UnknownAbiAction(action.to_string()))?
            .clone();
        self.unpack(&type_name, data)
    }

    /// Decode a value of `type_name` from `data`.
    ///
    /// Trailing bytes are tolerated; the caller decides whether the payload
    /// may carry extra data.
    pub fn unpack(&self, type_name: &str, data: &[u8]) -> Result<Value> {
        let deadline = Deadline::new(self.max_time);
        let mut reader = ByteReader::new(data);
        self.unpack_type(type_name, &mut reader, &deadline, 0)
    }

    fn resolve(&self, type_name: &str) -> Result<String> {
        let mut current = type_name.to_string();
        for _ in 0..MAX_TYPEDEF_DEPTH {
            match self.typedefs.get(&current) {
                Some(next) => current = next.clone(),
                None => return Ok(current),
            }
        }
        Err(CoreError::TypeResolution(type_name.to_string()))
    }

    fn unpack_type(
        &self,
        type_name: &str,
        reader: &mut ByteReader<'_>,
        deadline: &Deadline,
        depth: usize,
    ) -> Result<Value> {
        deadline.check()?;
        if depth > MAX_NESTING {
            return Err(CoreError::NestingTooDeep(MAX_NESTING));
        }

        if let Some(element) = type_name.strip_suffix("[]") {
            let count = reader.read_varuint32()?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                items.push(self.unpack_type(element, reader, deadline, depth + 1)?);
            }
            return Ok(Value::Array(items));
        }

        if let Some(inner) = type_name.strip_suffix('?') {
            let present = reader.read_u8()?;
            if present == 0 {
                return Ok(Value::Null);
            }
            return self.unpack_type(inner, reader, deadline, depth + 1);
        }

        let resolved = self.resolve(type_name)?;

        if let Some(hook) = self.special.get(&resolved) {
            return self.unpack_special(*hook, reader);
        }

        if let Some(value) = unpack_builtin(&resolved, reader)? {
            return Ok(value);
        }

        if let Some(variant) = self.variants.get(&resolved) {
            let index = reader.read_varuint32()? as usize;
            let selected = variant
                .types
                .get(index)
                .ok_or_else(|| CoreError::UnknownAbiType(resolved.clone()))?
                .clone();
            let inner = self.unpack_type(&selected, reader, deadline, depth + 1)?;
            return Ok(json!([selected, inner]));
        }

        if let Some(struct_def) = self.structs.get(&resolved) {
            let mut object = Map::new();
            if !struct_def.base.is_empty() {
                let base = self.unpack_type(&struct_def.base, reader, deadline, depth + 1)?;
                if let Value::Object(base_fields) = base {
                    object.extend(base_fields);
                }
            }
            for field in &struct_def.fields {
                let value = self.unpack_type(&field.type_, reader, deadline, depth + 1)?;
                object.insert(field.name.clone(), value);
            }
            return Ok(Value::Object(object));
        }

        Err(CoreError::UnknownAbiType(resolved))
    }

    fn unpack_special(&self, hook: SpecialUnpack, reader: &mut ByteReader<'_>) -> Result<Value> {
        match hook {
            SpecialUnpack::AbiDefBytes => {
                let raw = reader.read_length_prefixed()?;
                let nested = AbiDef::from_bytes(raw)?;
                serde_json::to_value(&nested).map_err(|_| CoreError::InvalidUtf8)
            }
        }
    }
}

/// Decode one of the fixed built-in types; `Ok(None)` when `type_name` is
/// not a built-in.
fn unpack_builtin(type_name: &str, r: &mut ByteReader<'_>) -> Result<Option<Value>> {
    let value = match type_name {
        "bool" => json!(r.read_u8()? != 0),
        "int8" => json!(r.read_i8()?),
        "uint8" => json!(r.read_u8()?),
        "int16" => json!(r.read_i16()?),
        "uint16" => json!(r.read_u16()?),
        "int32" => json!(r.read_i32()?),
        "uint32" => json!(r.read_u32()?),
        "int64" => json!(r.read_i64()?),
        "uint64" => json!(r.read_u64()?),
        "int128" => json!(r.read_i128()?.to_string()),
        "uint128" => json!(r.read_u128()?.to_string()),
        "varint32" => json!(r.read_varint32()?),
        "varuint32" => json!(r.read_varuint32()?),
        "float32" => json!(r.read_f32()?),
        "float64" => json!(r.read_f64()?),
        "float128" => json!(hex::encode(r.read_bytes(16)?)),
        "time_point" => {
            let micros = r.read_i64()?;
            json!(format_time_point(micros))
        }
        "time_point_sec" => {
            let secs = r.read_u32()?;
            json!(format_time_point(i64::from(secs) * 1_000_000))
        }
        "block_timestamp_type" => {
            // half-second slots since the chain epoch (2000-01-01T00:00:00)
            let slots = r.read_u32()?;
            let micros = 946_684_800_000_000i64 + i64::from(slots) * 500_000;
            json!(format_time_point(micros))
        }
        "name" => json!(Name::from_u64(r.read_u64()?).to_string()),
        "bytes" => json!(hex::encode(r.read_length_prefixed()?)),
        "string" => json!(r.read_string()?),
        "checksum160" => json!(hex::encode(r.read_bytes(20)?)),
        "checksum256" => json!(hex::encode(r.read_bytes(32)?)),
        "checksum512" => json!(hex::encode(r.read_bytes(64)?)),
        "public_key" => json!(PublicKey::read(r)?.to_string()),
        "signature" => json!(Signature::read(r)?.to_string()),
        "symbol" => json!(Symbol::from_u64(r.read_u64()?).to_string()),
        "symbol_code" => json!(SymbolCode::from_u64(r.read_u64()?).to_string()),
        "asset" => {
            let amount = r.read_i64()?;
            let symbol = Symbol::from_u64(r.read_u64()?);
            json!(Asset { amount, symbol }.to_string())
        }
        "extended_asset" => {
            let amount = r.read_i64()?;
            let symbol = Symbol::from_u64(r.read_u64()?);
            let contract = Name::from_u64(r.read_u64()?);
            json!({
                "quantity": Asset { amount, symbol }.to_string(),
                "contract": contract.to_string(),
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn format_time_point(micros: i64) -> String {
    match DateTime::from_timestamp_micros(micros) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        None => micros.to_string(),
    }
}
