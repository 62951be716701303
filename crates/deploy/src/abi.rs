//! ABI encoding of manifest arguments.
//!
//! Manifest arguments are untyped text. They get their Solidity type from the parameter
//! list they are passed to: a function signature, or the `constructor` types of a
//! contract. Without declared types every scalar keeps its widest type (`uint256`,
//! `int256`, `bytes32`).

use std::{collections::BTreeMap, fmt, str::FromStr};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, B256, Bytes, keccak256},
};
use anyhow::{Context, Result};

use crate::{Arg, Condition, ContractSpec};

/// Parse a parenthesised type list such as `(address,uint256[3])`.
pub fn parse_types(list: &str) -> Result<Vec<DynSolType>> {
    let compact: String = list.split_whitespace().collect();
    match DynSolType::parse(&compact) {
        Ok(DynSolType::Tuple(types)) => Ok(types),
        Ok(_) => anyhow::bail!("Type list {list:?} must be parenthesised"),
        Err(e) => anyhow::bail!("Invalid type list {list:?}: {e}"),
    }
}

/// A function signature, e.g. `setAddress(bytes32,address)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub inputs: Vec<DynSolType>,
}

impl Signature {
    /// Canonical form the selector is hashed from.
    pub fn canonical(&self) -> String {
        let inputs: Vec<_> = self.inputs.iter().map(DynSolType::sol_type_name).collect();
        format!("{}({})", self.name, inputs.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.canonical().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// Calldata of a call with `values`.
    pub fn encode_call(&self, values: Vec<DynSolValue>) -> Result<Bytes> {
        if !DynSolType::matches_many(&self.inputs, &values) {
            anyhow::bail!("Arguments do not match {}", self.canonical());
        }

        let mut data = self.selector().to_vec();
        data.extend_from_slice(&DynSolValue::Tuple(values).abi_encode_params());
        Ok(Bytes::from(data))
    }
}

impl FromStr for Signature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let open = s
            .find('(')
            .with_context(|| format!("Signature {s:?} has no parameter list"))?;
        let name = s[..open].trim();

        let valid_name = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            anyhow::bail!("Signature {s:?} has an invalid function name");
        }

        Ok(Self {
            name: name.to_string(),
            inputs: parse_types(&s[open..]).context(format!("Invalid signature {s:?}"))?,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn text_word(text: &str) -> Result<B256> {
    let bytes = text.as_bytes();
    if bytes.len() > 31 {
        anyhow::bail!("bytes32 text {text:?} is longer than 31 bytes");
    }
    let mut word = B256::ZERO;
    word[..bytes.len()].copy_from_slice(bytes);
    Ok(word)
}

/// Addresses the symbols of a manifest entry resolve to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bindings {
    addresses: BTreeMap<String, Address>,
    deployer: Address,
    /// Answer the zero address for unknown symbols, for type checks before a run.
    placeholder: bool,
}

impl Bindings {
    pub fn new(deployer: Address) -> Self {
        Self {
            addresses: BTreeMap::new(),
            deployer,
            placeholder: false,
        }
    }

    fn placeholder() -> Self {
        Self {
            placeholder: true,
            ..Self::new(Address::ZERO)
        }
    }

    pub fn bind(&mut self, symbol: impl Into<String>, address: Address) {
        self.addresses.insert(symbol.into(), address);
    }

    pub fn address(&self, symbol: &str) -> Result<Address> {
        match self.addresses.get(symbol) {
            Some(address) => Ok(*address),
            None if self.placeholder => Ok(Address::ZERO),
            None => anyhow::bail!("Contract {symbol} is not resolved yet"),
        }
    }

    /// Value of `arg`, shaped by `ty` when the parameter type is known.
    pub fn value(&self, arg: &Arg, ty: Option<&DynSolType>) -> Result<DynSolValue> {
        let value = match (arg, ty) {
            (Arg::List(items), Some(DynSolType::Array(inner))) => DynSolValue::Array(
                items
                    .iter()
                    .map(|item| self.value(item, Some(inner)))
                    .collect::<Result<_>>()?,
            ),
            (Arg::List(items), Some(DynSolType::FixedArray(inner, length))) => {
                if items.len() != *length {
                    anyhow::bail!("{arg} has {} items, {} expected", items.len(), length);
                }
                DynSolValue::FixedArray(
                    items
                        .iter()
                        .map(|item| self.value(item, Some(inner)))
                        .collect::<Result<_>>()?,
                )
            }
            (Arg::List(items), Some(DynSolType::Tuple(types))) => {
                DynSolValue::Tuple(self.values(items, types)?)
            }
            (Arg::List(_), _) => {
                anyhow::bail!("{arg} needs an array or tuple parameter type")
            }
            (Arg::Uint(value), Some(DynSolType::Uint(bits))) => {
                if value.bit_len() > *bits {
                    anyhow::bail!("{arg} does not fit in uint{bits}");
                }
                DynSolValue::Uint(*value, *bits)
            }
            (Arg::Int(value), Some(DynSolType::Int(bits))) => {
                if *bits < 256 && value.unsigned_abs().bit_len() >= *bits {
                    anyhow::bail!("{arg} does not fit in int{bits}");
                }
                DynSolValue::Int(*value, *bits)
            }
            (Arg::Bytes(bytes), Some(DynSolType::FixedBytes(size))) => {
                if bytes.len() != *size {
                    anyhow::bail!("{arg} is {} bytes long, bytes{size} expected", bytes.len());
                }
                let mut word = B256::ZERO;
                word[..bytes.len()].copy_from_slice(bytes);
                DynSolValue::FixedBytes(word, *size)
            }
            (Arg::Contract(symbol), _) => DynSolValue::Address(self.address(symbol)?),
            (Arg::Deployer, _) => DynSolValue::Address(self.deployer),
            (Arg::Address(address), _) => DynSolValue::Address(*address),
            (Arg::Uint(value), _) => DynSolValue::Uint(*value, 256),
            (Arg::Int(value), _) => DynSolValue::Int(*value, 256),
            (Arg::Bool(value), _) => DynSolValue::Bool(*value),
            (Arg::String(value), _) => DynSolValue::String(value.clone()),
            (Arg::Bytes32(text), _) => DynSolValue::FixedBytes(text_word(text)?, 32),
            (Arg::Keccak256(text), _) => DynSolValue::FixedBytes(keccak256(text.as_bytes()), 32),
            (Arg::Bytes(bytes), _) => DynSolValue::Bytes(bytes.to_vec()),
        };

        if let Some(ty) = ty {
            if !ty.matches(&value) {
                anyhow::bail!("{arg} is not a valid {ty}");
            }
        }

        Ok(value)
    }

    /// Values of `args` for a parameter list.
    pub fn values(&self, args: &[Arg], types: &[DynSolType]) -> Result<Vec<DynSolValue>> {
        if args.len() != types.len() {
            anyhow::bail!("{} arguments given, {} expected", args.len(), types.len());
        }

        args.iter()
            .zip(types)
            .map(|(arg, ty)| self.value(arg, Some(ty)))
            .collect()
    }

    /// Whether `value`, read as type `ty`, satisfies `condition`.
    pub fn satisfies(
        &self,
        condition: &Condition,
        value: &DynSolValue,
        ty: &DynSolType,
    ) -> Result<bool> {
        match condition {
            Condition::Nonzero => {
                if let Some(word) = value.as_word() {
                    return Ok(!word.is_zero());
                }
                match value {
                    DynSolValue::Bytes(bytes) => Ok(!bytes.is_empty()),
                    DynSolValue::String(text) => Ok(!text.is_empty()),
                    DynSolValue::Array(items) => Ok(!items.is_empty()),
                    _ => anyhow::bail!("Cannot test a {ty} for zero"),
                }
            }
            Condition::Equals(arg) => Ok(*value == self.value(arg, Some(ty))?),
            Condition::AtLeast(arg) => {
                let actual = value
                    .as_uint()
                    .with_context(|| format!("Cannot compare a {ty} with at_least"))?;
                let threshold = self
                    .value(arg, Some(ty))?
                    .as_uint()
                    .with_context(|| format!("{arg} is not an unsigned integer"))?;
                Ok(actual.0 >= threshold.0)
            }
            Condition::Contains(arg) => {
                let (items, inner) = match (value, ty) {
                    (DynSolValue::Array(items), DynSolType::Array(inner))
                    | (DynSolValue::FixedArray(items), DynSolType::FixedArray(inner, _)) => {
                        (items, inner)
                    }
                    _ => anyhow::bail!("Cannot search a {ty} with contains"),
                };
                let needle = self.value(arg, Some(inner))?;
                Ok(items.contains(&needle))
            }
        }
    }
}

/// Check that `args` fit `types`, before any symbol is resolved.
pub fn check_args(args: &[Arg], types: &[DynSolType]) -> Result<()> {
    Bindings::placeholder().values(args, types).map(|_| ())
}

/// ABI-encode the constructor arguments of `contract`.
pub fn encode_constructor_args(contract: &ContractSpec, bindings: &Bindings) -> Result<Bytes> {
    if contract.args.is_empty() {
        return Ok(Bytes::new());
    }

    let values = match contract.constructor_types()? {
        Some(types) => bindings.values(&contract.args, &types)?,
        None => contract
            .args
            .iter()
            .map(|arg| bindings.value(arg, None))
            .collect::<Result<_>>()?,
    };

    Ok(Bytes::from(DynSolValue::Tuple(values).abi_encode_params()))
}

/// Decode the output of a read and pick value number `field`.
pub fn decode_output(returns: &str, field: usize, data: &[u8]) -> Result<(DynSolValue, DynSolType)> {
    if data.is_empty() {
        anyhow::bail!("Call returned no data (no contract at the address, or a revert)");
    }

    let types = parse_types(returns)?;
    let ty = types
        .get(field)
        .cloned()
        .with_context(|| format!("Output {returns} has no field {field}"))?;

    let decoded = DynSolType::Tuple(types)
        .abi_decode_params(data)
        .map_err(|e| anyhow::anyhow!("Failed to decode output as {returns}: {e}"))?;

    let value = match decoded {
        DynSolValue::Tuple(values) => values.into_iter().nth(field),
        _ => None,
    }
    .with_context(|| format!("Output {returns} has no field {field}"))?;

    Ok((value, ty))
}
