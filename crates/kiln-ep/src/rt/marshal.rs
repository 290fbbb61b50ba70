//! Element type mapping between host tensors and buffer views.

use kiln_onnx::DataType;
use kiln_runtime::hal::ElementType;

/// Buffer view element type for a host data type. Float8 variants have no
/// runtime equivalent.
pub fn to_hal_element_type(dtype: DataType) -> Option<ElementType> {
    Some(match dtype {
        DataType::F32 => ElementType::Float32,
        DataType::U8 => ElementType::Uint8,
        DataType::I8 => ElementType::Sint8,
        DataType::U16 => ElementType::Uint16,
        DataType::I16 => ElementType::Sint16,
        DataType::I32 => ElementType::Sint32,
        DataType::I64 => ElementType::Sint64,
        DataType::Bool => ElementType::Bool8,
        DataType::F16 => ElementType::Float16,
        DataType::F64 => ElementType::Float64,
        DataType::U32 => ElementType::Uint32,
        DataType::U64 => ElementType::Uint64,
        DataType::Complex64 => ElementType::ComplexFloat64,
        DataType::Complex128 => ElementType::ComplexFloat128,
        DataType::BF16 => ElementType::BFloat16,
        DataType::Float8E4M3FN
        | DataType::Float8E4M3FNUZ
        | DataType::Float8E5M2
        | DataType::Float8E5M2FNUZ => return None,
    })
}

/// Host data type for a buffer view element type.
pub fn from_hal_element_type(element_type: ElementType) -> Option<DataType> {
    Some(match element_type {
        ElementType::Float32 => DataType::F32,
        ElementType::Uint8 => DataType::U8,
        ElementType::Sint8 => DataType::I8,
        ElementType::Uint16 => DataType::U16,
        ElementType::Sint16 => DataType::I16,
        ElementType::Sint32 => DataType::I32,
        ElementType::Sint64 => DataType::I64,
        ElementType::Bool8 => DataType::Bool,
        ElementType::Float16 => DataType::F16,
        ElementType::Float64 => DataType::F64,
        ElementType::Uint32 => DataType::U32,
        ElementType::Uint64 => DataType::U64,
        ElementType::ComplexFloat64 => DataType::Complex64,
        ElementType::ComplexFloat128 => DataType::Complex128,
        ElementType::BFloat16 => DataType::BF16,
        ElementType::None | ElementType::Sint4 | ElementType::Uint4 => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_types_map_both_ways() {
        for dtype in DataType::ALL {
            match to_hal_element_type(dtype) {
                Some(element_type) => {
                    assert!(element_type.is_byte_aligned());
                    assert_eq!(element_type.dense_byte_count(), dtype.size(), "{}", dtype);
                    assert_eq!(from_hal_element_type(element_type), Some(dtype));
                }
                None => assert!(dtype.is_float8(), "{}", dtype),
            }
        }
    }

    #[test]
    fn test_sub_byte_types_have_no_host_type() {
        assert_eq!(from_hal_element_type(ElementType::Sint4), None);
        assert_eq!(from_hal_element_type(ElementType::None), None);
    }
}
