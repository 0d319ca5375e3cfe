//! Property tests for the buffer and the endianness conversions.

use bitbind::binding::IntegerBind;
use bitbind::bits::{BitSet, ByteOrder};
use bitbind::buffer::{BitReader, BitWriter};
use bitbind::core::CoreBuilder;
use bitbind::template::TypeDef;
use bitbind::value::{Message, Value};
use proptest::prelude::*;

proptest! {
    #[test]
    fn write_then_read_bits(value in 0u64..u64::MAX, width in 1usize..=64) {
        let value = value & if width == 64 { u64::MAX } else { (1 << width) - 1 };

        let mut writer = BitWriter::new();
        writer.write_uint(value as u128, width, ByteOrder::Big);
        writer.flush();
        let bytes = writer.to_bytes();

        let mut reader = BitReader::new(&bytes);
        prop_assert_eq!(reader.read_uint(width, ByteOrder::Big).unwrap(), value as u128);
    }

    #[test]
    fn integer_round_trips_both_orders(value in any::<u128>(), width in 1usize..=128) {
        let value = if width == 128 { value } else { value & ((1 << width) - 1) };

        for order in [ByteOrder::Big, ByteOrder::Little] {
            let mut writer = BitWriter::new();
            writer.write_uint(value, width, order);
            writer.flush();
            let bytes = writer.to_bytes();

            let mut reader = BitReader::new(&bytes);
            prop_assert_eq!(reader.read_uint(width, order).unwrap(), value);
        }
    }

    #[test]
    fn signed_round_trips(value in any::<i64>(), width in 1usize..=64) {
        let truncated = (value << (64 - width)) >> (64 - width);

        let mut writer = BitWriter::new();
        writer.write_int(truncated as i128, width, ByteOrder::Big);
        writer.flush();
        let bytes = writer.to_bytes();

        let mut reader = BitReader::new(&bytes);
        prop_assert_eq!(reader.read_int(width, ByteOrder::Big).unwrap(), truncated as i128);
    }

    #[test]
    fn bitmap_integer_conversions(value in any::<u128>(), width in 0usize..=128) {
        let value = match width {
            0 => 0,
            128 => value,
            _ => value & ((1 << width) - 1),
        };

        for order in [ByteOrder::Big, ByteOrder::Little] {
            let bits = BitSet::from_uint(value, width, order);
            prop_assert_eq!(bits.len(), width);
            prop_assert_eq!(bits.to_uint(order).unwrap(), value);
        }
    }

    #[test]
    fn interleaved_widths_round_trip(values in prop::collection::vec((1usize..=32, any::<u32>()), 1..16)) {
        let mut writer = BitWriter::new();
        for (width, value) in &values {
            let masked = (*value as u128) & ((1 << width) - 1);
            writer.write_uint(masked, *width, ByteOrder::Big);
        }
        writer.flush();
        let bytes = writer.to_bytes();

        let mut reader = BitReader::new(&bytes);
        for (width, value) in &values {
            let masked = (*value as u128) & ((1 << width) - 1);
            prop_assert_eq!(reader.read_uint(*width, ByteOrder::Big).unwrap(), masked);
        }
    }

    #[test]
    fn message_round_trips_through_core(a in 0u8..32, b in any::<u8>(), c in any::<u16>()) {
        let core = CoreBuilder::new()
            .register_type(
                TypeDef::new("T")
                    .field("a", IntegerBind::new(5))
                    .field("b", IntegerBind::new(8))
                    .field("c", IntegerBind::new(16).order(ByteOrder::Little)),
            )
            .build()
            .unwrap();

        let message = Message::new("T")
            .with("a", Value::UInt(a as u128))
            .with("b", Value::UInt(b as u128))
            .with("c", Value::UInt(c as u128));

        let bytes = core.compose("T", &message).unwrap();
        let decoded = core.parse("T", &bytes).unwrap();
        prop_assert_eq!(decoded, message);

        let again = core.compose("T", &core.parse("T", &bytes).unwrap()).unwrap();
        prop_assert_eq!(again, bytes);
    }
}
