use crate::buffer::HostElement;
use crate::tensor::Tensor;
use std::collections::BTreeMap;

/// Checks if a host tensor is approximately equal to the expected shape and data.
/// Panics if shapes differ, the tensor is not a host tensor of element type `T`,
/// or any element differs by more than `tolerance`.
pub fn check_tensor_near<T: HostElement>(
    actual: &Tensor,
    expected_shape: &[usize],
    expected_data: &[T],
    tolerance: T,
) {
    assert_eq!(actual.shape(), expected_shape, "Shape mismatch");

    let actual_data = match actual.as_slice::<T>() {
        Ok(data) => data,
        Err(e) => panic!("check_tensor_near needs host data: {}", e),
    };
    assert_eq!(actual_data.len(), expected_data.len(), "Data length mismatch");

    for (i, (a, e)) in actual_data.iter().zip(expected_data.iter()).enumerate() {
        let diff = (*a - *e).abs();
        if diff > tolerance {
            panic!(
                "Data mismatch at index {}: actual={:?}, expected={:?}, diff={:?}, tolerance={:?}",
                i, a, e, diff, tolerance
            );
        }
    }
}

/// Slot -> single tensor map, the shape kernels receive their inputs in.
pub fn slot_tensors<'a, I>(pairs: I) -> BTreeMap<String, Vec<Tensor>>
where
    I: IntoIterator<Item = (&'a str, Tensor)>,
{
    pairs
        .into_iter()
        .map(|(slot, tensor)| (slot.to_string(), vec![tensor]))
        .collect()
}
