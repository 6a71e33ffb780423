//! Property P1: `unmarshal(d, marshal(d, p)) == p` for arbitrary well-typed
//! values of a fixed dataset shape.

use proptest::prelude::*;
use trdp_wire::marshal::{
    marshal, unmarshal, DatasetDescriptor, DatasetValue, ElementDescriptor, ElementType,
    EmptyRegistry,
};

fn scalar_descriptor() -> DatasetDescriptor {
    DatasetDescriptor {
        dataset_id: 42,
        elements: vec![
            ElementDescriptor {
                element_type: ElementType::Bool8,
                count: 1,
            },
            ElementDescriptor {
                element_type: ElementType::Int32,
                count: 1,
            },
            ElementDescriptor {
                element_type: ElementType::Real64,
                count: 1,
            },
        ],
    }
}

fn variable_descriptor() -> DatasetDescriptor {
    DatasetDescriptor {
        dataset_id: 43,
        elements: vec![
            ElementDescriptor {
                element_type: ElementType::UInt16,
                count: 1,
            },
            ElementDescriptor {
                element_type: ElementType::UInt8,
                count: 0,
            },
        ],
    }
}

proptest! {
    #[test]
    fn scalar_dataset_round_trips(b in any::<bool>(), i in any::<i32>(), f in any::<f64>()) {
        let descriptor = scalar_descriptor();
        let values = vec![DatasetValue::Bool(b), DatasetValue::Int32(i), DatasetValue::Real64(f)];
        let registry = EmptyRegistry;
        let bytes = marshal(&registry, &descriptor, &values).unwrap();
        let decoded = unmarshal(&registry, &descriptor, &bytes, bytes.len()).unwrap();
        prop_assert_eq!(decoded, values);
    }

    #[test]
    fn variable_length_dataset_round_trips(items in prop::collection::vec(any::<u8>(), 0..64)) {
        let descriptor = variable_descriptor();
        let registry = EmptyRegistry;
        let values = vec![
            DatasetValue::UInt16(items.len() as u16),
            DatasetValue::Array(items.iter().copied().map(DatasetValue::UInt8).collect()),
        ];
        let bytes = marshal(&registry, &descriptor, &values).unwrap();
        let decoded = unmarshal(&registry, &descriptor, &bytes, bytes.len()).unwrap();
        prop_assert_eq!(decoded, values);
    }
}
