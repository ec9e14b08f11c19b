//! The ABI definition type: the per-account schema that describes how to
//! interpret binary action payloads.
//!
//! An [`AbiDef`] exists in two encodings: the JSON form stored in the
//! `accounts` collection, and the chain's binary form carried by `setabi`
//! payloads. Both are supported here; the serializer in
//! [`crate::serializer`] consumes the decoded definition.

use serde::{Deserialize, Serialize};

use crate::bytes::{ByteReader, ByteWriter};
use crate::error::Result;
use crate::name::Name;

/// A named alias for another type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

/// One field of a struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

/// A struct: ordered fields, optionally extending a base struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// Maps an action name to the struct type of its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: Name,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub ricardian_contract: String,
}

/// Table metadata; carried through but not interpreted by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: Name,
    #[serde(default)]
    pub index_type: String,
    #[serde(default)]
    pub key_names: Vec<String>,
    #[serde(default)]
    pub key_types: Vec<String>,
    #[serde(rename = "type")]
    pub type_: String,
}

/// Ricardian clause text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClausePair {
    pub id: String,
    pub body: String,
}

/// Human-readable error mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error_code: u64,
    pub error_msg: String,
}

/// A tagged union of the listed types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDef {
    pub name: String,
    pub types: Vec<String>,
}

/// A complete per-account ABI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiDef {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub ricardian_clauses: Vec<ClausePair>,
    #[serde(default)]
    pub error_messages: Vec<ErrorMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<VariantDef>,
}

impl AbiDef {
    /// Decode the chain's binary ABI encoding.
    ///
    /// Older ABI versions end after `error_messages`; anything past that
    /// point (extensions, variants) is read only when present.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let mut abi = AbiDef {
            version: r.read_string()?,
            ..Default::default()
        };

        let type_count = r.read_varuint32()?;
        for _ in 0..type_count {
            abi.types.push(TypeDef {
                new_type_name: r.read_string()?,
                type_: r.read_string()?,
            });
        }

        let struct_count = r.read_varuint32()?;
        for _ in 0..struct_count {
            let name = r.read_string()?;
            let base = r.read_string()?;
            let field_count = r.read_varuint32()?;
            let mut fields = Vec::with_capacity(field_count as usize);
            for _ in 0..field_count {
                fields.push(FieldDef {
                    name: r.read_string()?,
                    type_: r.read_string()?,
                });
            }
            abi.structs.push(StructDef { name, base, fields });
        }

        let action_count = r.read_varuint32()?;
        for _ in 0..action_count {
            abi.actions.push(ActionDef {
                name: Name::from_u64(r.read_u64()?),
                type_: r.read_string()?,
                ricardian_contract: r.read_string()?,
            });
        }

        let table_count = r.read_varuint32()?;
        for _ in 0..table_count {
            let name = Name::from_u64(r.read_u64()?);
            let index_type = r.read_string()?;
            let key_name_count = r.read_varuint32()?;
            let mut key_names = Vec::with_capacity(key_name_count as usize);
            for _ in 0..key_name_count {
                key_names.push(r.read_string()?);
            }
            let key_type_count = r.read_varuint32()?;
            let mut key_types = Vec::with_capacity(key_type_count as usize);
            for _ in 0..key_type_count {
                key_types.push(r.read_string()?);
            }
            let type_ = r.read_string()?;
            abi.tables.push(TableDef {
                name,
                index_type,
                key_names,
                key_types,
                type_,
            });
        }

        let clause_count = r.read_varuint32()?;
        for _ in 0..clause_count {
            abi.ricardian_clauses.push(ClausePair {
                id: r.read_string()?,
                body: r.read_string()?,
            });
        }

        let error_count = r.read_varuint32()?;
        for _ in 0..error_count {
            abi.error_messages.push(ErrorMessage {
                error_code: r.read_u64()?,
                error_msg: r.read_string()?,
            });
        }

        if r.is_empty() {
            return Ok(abi);
        }

        // abi extensions: (u16 tag, bytes) pairs, unused here
        let ext_count = r.read_varuint32()?;
        for _ in 0..ext_count {
            let _tag = r.read_u16()?;
            let _payload = r.read_length_prefixed()?;
        }

        if r.is_empty() {
            return Ok(abi);
        }

        let variant_count = r.read_varuint32()?;
        for _ in 0..variant_count {
            let name = r.read_string()?;
            let vtype_count = r.read_varuint32()?;
            let mut types = Vec::with_capacity(vtype_count as usize);
            for _ in 0..vtype_count {
                types.push(r.read_string()?);
            }
            abi.variants.push(VariantDef { name, types });
        }

        Ok(abi)
    }

    /// Encode into the chain's binary ABI encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_string(&self.version);

        w.write_varuint32(self.types.len() as u32);
        for t in &self.types {
            w.write_string(&t.new_type_name);
            w.write_string(&t.type_);
        }

        w.write_varuint32(self.structs.len() as u32);
        for s in &self.structs {
            w.write_string(&s.name);
            w.write_string(&s.base);
            w.write_varuint32(s.fields.len() as u32);
            for f in &s.fields {
                w.write_string(&f.name);
                w.write_string(&f.type_);
            }
        }

        w.write_varuint32(self.actions.len() as u32);
        for a in &self.actions {
            w.write_u64(a.name.as_u64());
            w.write_string(&a.type_);
            w.write_string(&a.ricardian_contract);
        }

        w.write_varuint32(self.tables.len() as u32);
        for t in &self.tables {
            w.write_u64(t.name.as_u64());
            w.write_string(&t.index_type);
            w.write_varuint32(t.key_names.len() as u32);
            for k in &t.key_names {
                w.write_string(k);
            }
            w.write_varuint32(t.key_types.len() as u32);
            for k in &t.key_types {
                w.write_string(k);
            }
            w.write_string(&t.type_);
        }

        w.write_varuint32(self.ricardian_clauses.len() as u32);
        for c in &self.ricardian_clauses {
            w.write_string(&c.id);
            w.write_string(&c.body);
        }

        w.write_varuint32(self.error_messages.len() as u32);
        for e in &self.error_messages {
            w.write_u64(e.error_code);
            w.write_string(&e.error_msg);
        }

        if !self.variants.is_empty() {
            // empty extension list, then the variant section
            w.write_varuint32(0);
            w.write_varuint32(self.variants.len() as u32);
            for v in &self.variants {
                w.write_string(&v.name);
                w.write_varuint32(v.types.len() as u32);
                for t in &v.types {
                    w.write_string(t);
                }
            }
        }

        w.into_inner()
    }
}
