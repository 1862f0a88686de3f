use super::*;

#[test]
fn test_scalar_accessors_match_only_their_variant() {
    let epsilon = AttrValue::from(0.5);
    assert_eq!(epsilon.as_float(), Some(0.5));
    assert_eq!(epsilon.as_int(), None);

    let axis = AttrValue::from(-1i64);
    assert_eq!(axis.as_int(), Some(-1));
    assert_eq!(axis.as_float(), None);

    let keep = AttrValue::from(true);
    assert_eq!(keep.as_bool(), Some(true));
    assert_eq!(keep.as_str(), None);
}

#[test]
fn test_list_values_report_list_types() {
    assert_eq!(AttrValue::from(vec![1i64, 2]).attr_type(), AttrType::Ints);
    assert_eq!(AttrValue::from(vec![true]).attr_type(), AttrType::Bools);
    assert_eq!(AttrType::Strs.to_string(), "list<string>");
}
