use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LayoutNode, MibSource, PacketKey, ParamFormat, ParameterLayout, Value};
use crate::bits::BitCursor;
use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedParameter {
    pub name: String,
    pub value: Value,
}

/// Result of decoding a packet's source data.
///
/// Decoding never fails; if the packet cannot be decoded `decoded` is false and the
/// source data is returned as-is in `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPacket {
    pub key: PacketKey,
    pub name: Option<String>,
    pub decoded: bool,
    #[serde(with = "serde_bytes")]
    pub raw: Vec<u8>,
    pub values: Vec<DecodedParameter>,
}

/// Decode `data` (packet source data) using the layout registered for `key`.
pub fn decode_parameters<M: MibSource + ?Sized>(
    mib: &M,
    key: &PacketKey,
    data: &[u8],
) -> DecodedPacket {
    let Some(record) = mib.lookup_packet_layout(key) else {
        debug!(%key, "{}", Error::UnknownPacketKey(*key));
        return undecoded(*key, None, data);
    };
    let result = match &record.layout {
        ParameterLayout::Fixed { parameters } => decode_fixed(mib, parameters, data),
        ParameterLayout::Variable { nodes } => decode_variable(mib, nodes, data),
    };
    match result {
        Ok(values) => DecodedPacket {
            key: *key,
            name: Some(record.name.clone()),
            decoded: true,
            raw: data.to_vec(),
            values,
        },
        Err(err) => {
            debug!(%key, packet = %record.name, "decode failed: {err}");
            undecoded(*key, Some(record.name.clone()), data)
        }
    }
}

fn undecoded(key: PacketKey, name: Option<String>, data: &[u8]) -> DecodedPacket {
    DecodedPacket {
        key,
        name,
        decoded: false,
        raw: data.to_vec(),
        values: Vec::new(),
    }
}

fn resolve<M: MibSource + ?Sized>(mib: &M, name: &str) -> Result<ParamFormat> {
    let fmt = mib
        .lookup_parameter_format(name)
        .ok_or_else(|| Error::UnknownParameter(name.to_string()))?;
    ParamFormat::from_ptc_pfc(fmt.ptc, fmt.pfc)
}

fn decode_fixed<M: MibSource + ?Sized>(
    mib: &M,
    names: &[String],
    data: &[u8],
) -> Result<Vec<DecodedParameter>> {
    let formats = names
        .iter()
        .map(|name| resolve(mib, name))
        .collect::<Result<Vec<_>>>()?;

    let total: Option<usize> = formats.iter().map(ParamFormat::bit_width).sum();
    if total == Some(data.len() * 8) {
        let mut cur = BitCursor::new(data);
        return names
            .iter()
            .zip(&formats)
            .map(|(name, fmt)| {
                Ok(DecodedParameter {
                    name: name.clone(),
                    value: fmt.read(&mut cur)?,
                })
            })
            .collect();
    }

    // Layout widths do not cover the data exactly; place each parameter at its MIB
    // offset, or directly after the previous one if it has none.
    let mut next = 0usize;
    let mut values = Vec::with_capacity(names.len());
    for (name, fmt) in names.iter().zip(&formats) {
        let start = mib
            .lookup_parameter_format(name)
            .and_then(|f| f.byte_offset.map(|b| b * 8 + f.bit_offset))
            .unwrap_or(next);
        let mut cur = BitCursor::at(data, start);
        values.push(DecodedParameter {
            name: name.clone(),
            value: fmt.read(&mut cur)?,
        });
        next = cur.bit_position();
    }
    Ok(values)
}

fn decode_variable<M: MibSource + ?Sized>(
    mib: &M,
    nodes: &[LayoutNode],
    data: &[u8],
) -> Result<Vec<DecodedParameter>> {
    let mut cur = BitCursor::new(data);
    let mut values = Vec::new();
    decode_nodes(mib, nodes, &mut cur, &mut values)?;
    Ok(values)
}

fn decode_nodes<M: MibSource + ?Sized>(
    mib: &M,
    nodes: &[LayoutNode],
    cur: &mut BitCursor,
    out: &mut Vec<DecodedParameter>,
) -> Result<()> {
    for node in nodes {
        let value = resolve(mib, &node.parameter)?.read(cur)?;
        let repeat = if node.group.is_empty() {
            0
        } else {
            match node.fixrep {
                Some(n) => u64::from(n),
                None => value.as_count()?,
            }
        };
        out.push(DecodedParameter {
            name: node.parameter.clone(),
            value,
        });
        for _ in 0..repeat {
            decode_nodes(mib, &node.group, cur, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::mib::{PacketRecord, ParameterFormat};

    #[derive(Default)]
    struct TestMib {
        packets: HashMap<PacketKey, PacketRecord>,
        formats: HashMap<String, ParameterFormat>,
    }

    impl TestMib {
        fn param(mut self, name: &str, ptc: u8, pfc: u16) -> Self {
            self.formats.insert(
                name.to_string(),
                ParameterFormat {
                    ptc,
                    pfc,
                    byte_offset: None,
                    bit_offset: 0,
                },
            );
            self
        }

        fn packet(mut self, layout: ParameterLayout) -> Self {
            self.packets.insert(
                key(),
                PacketRecord {
                    key: key(),
                    name: "TEST".to_string(),
                    description: String::new(),
                    layout,
                },
            );
            self
        }
    }

    impl MibSource for TestMib {
        fn lookup_packet_layout(&self, key: &PacketKey) -> Option<&PacketRecord> {
            self.packets.get(key)
        }

        fn lookup_parameter_format(&self, name: &str) -> Option<ParameterFormat> {
            self.formats.get(name).copied()
        }
    }

    fn key() -> PacketKey {
        PacketKey::new(3, 25, 1, 0)
    }

    fn names(packet: &DecodedPacket) -> Vec<&str> {
        packet.values.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn fixed_bulk_with_sub_byte_fields() {
        let mib = TestMib::default()
            .param("A", 3, 0) // 4 bits
            .param("B", 3, 0)
            .param("C", 4, 4) // 8 bits signed
            .packet(ParameterLayout::Fixed {
                parameters: vec!["A".into(), "B".into(), "C".into()],
            });
        let decoded = decode_parameters(&mib, &key(), &[0xa5, 0xff]);
        assert!(decoded.decoded);
        assert_eq!(decoded.values[0].value, Value::Unsigned(0xa));
        assert_eq!(decoded.values[1].value, Value::Unsigned(0x5));
        assert_eq!(decoded.values[2].value, Value::Signed(-1));
    }

    #[test]
    fn repeat_group_count_two() {
        let mib = TestMib::default()
            .param("N", 3, 4)
            .param("X", 3, 4)
            .param("Y", 3, 12)
            .param("Z", 1, 0)
            .param("TAIL", 3, 4)
            .packet(ParameterLayout::Variable {
                nodes: vec![
                    LayoutNode::counter(
                        "N",
                        vec![
                            LayoutNode::leaf("X"),
                            LayoutNode::leaf("Y"),
                            LayoutNode::leaf("Z"),
                        ],
                    ),
                    LayoutNode::leaf("TAIL"),
                ],
            });
        // Z is a single bit, so the second repetition starts mid-byte
        let mut data = vec![0u8; 9];
        let mut pos = 0;
        for (value, width) in [
            (2u64, 8),
            (0x11, 8),
            (0x0022, 16),
            (1, 1),
            (0x33, 8),
            (0x0044, 16),
            (0, 1),
            (0x99, 8),
        ] {
            crate::bits::write_bits(&mut data, pos, width, value).unwrap();
            pos += width;
        }

        let decoded = decode_parameters(&mib, &key(), &data);
        assert!(decoded.decoded, "{decoded:?}");
        // counter + 2 x 3 group parameters + trailing parameter
        assert_eq!(decoded.values.len(), 1 + 2 * 3 + 1);
        assert_eq!(names(&decoded), ["N", "X", "Y", "Z", "X", "Y", "Z", "TAIL"]);
        assert_eq!(decoded.values[3].value, Value::Bool(true));
        assert_eq!(decoded.values[5].value, Value::Unsigned(0x44));
        assert_eq!(decoded.values[6].value, Value::Bool(false));
        assert_eq!(decoded.values[7].value, Value::Unsigned(0x99));
    }

    #[test]
    fn fixrep_overrides_counter() {
        let mut node = LayoutNode::counter("N", vec![LayoutNode::leaf("X")]);
        node.fixrep = Some(3);
        let mib = TestMib::default()
            .param("N", 3, 4)
            .param("X", 3, 4)
            .packet(ParameterLayout::Variable { nodes: vec![node] });
        let decoded = decode_parameters(&mib, &key(), &[9, 1, 2, 3]);
        assert!(decoded.decoded);
        assert_eq!(names(&decoded), ["N", "X", "X", "X"]);
    }

    #[test]
    fn nested_groups() {
        let mib = TestMib::default()
            .param("OUTER", 3, 4)
            .param("INNER", 3, 4)
            .param("V", 3, 4)
            .packet(ParameterLayout::Variable {
                nodes: vec![LayoutNode::counter(
                    "OUTER",
                    vec![LayoutNode::counter("INNER", vec![LayoutNode::leaf("V")])],
                )],
            });
        // 2 outer: [1 inner: 7], [2 inner: 8, 9]
        let decoded = decode_parameters(&mib, &key(), &[2, 1, 7, 2, 8, 9]);
        assert!(decoded.decoded);
        assert_eq!(
            names(&decoded),
            ["OUTER", "INNER", "V", "INNER", "V", "V"]
        );
    }

    #[test]
    fn count_past_data_is_undecoded() {
        let mib = TestMib::default()
            .param("N", 3, 4)
            .param("X", 3, 12)
            .packet(ParameterLayout::Variable {
                nodes: vec![LayoutNode::counter("N", vec![LayoutNode::leaf("X")])],
            });
        let decoded = decode_parameters(&mib, &key(), &[200, 0, 1]);
        assert!(!decoded.decoded);
        assert_eq!(decoded.raw, vec![200, 0, 1]);
    }

    #[test]
    fn unresolved_format_is_undecoded() {
        let mib = TestMib::default()
            .param("A", 11, 0)
            .packet(ParameterLayout::Fixed {
                parameters: vec!["A".into(), "MISSING".into()],
            });
        let decoded = decode_parameters(&mib, &key(), &[1, 2]);
        assert!(!decoded.decoded);
        assert_eq!(decoded.name.as_deref(), Some("TEST"));
    }
}
