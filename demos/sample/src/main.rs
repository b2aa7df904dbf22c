use std::any::TypeId;
use std::collections::HashMap;

use jltensor::{
    register_tensor, FromForeign, IntoForeign, JlTensor, LocalRuntime, Marshaller, Result,
    TypeMapping,
};
use ndarray::{Array, Array2};

/// Stand-in for the embedding bridge's type table.
#[derive(Debug, Default)]
struct Bridge {
    mappings: HashMap<TypeId, TypeMapping>,
}

impl Marshaller for Bridge {
    fn add_type_mapping(&mut self, mapping: TypeMapping) -> Result<()> {
        println!("bridge: {} <-> {:?}", mapping.native_name, mapping.foreign_type);
        self.mappings.insert(mapping.native_id, mapping);
        Ok(())
    }
}

fn main() -> Result<()> {
    let rt = LocalRuntime::install_global()?;
    let mut bridge = Bridge::default();
    register_tensor::<f32, 2>(&mut bridge)?;

    let ping: Array2<f32> = Array::from_shape_vec((2, 3), vec![1f32, 2., 3., 4., 5., 6.]).unwrap();
    println!("ping {:?}", ping);

    let mut tensor = JlTensor::<f32, 2>::from_expr(&ping)?;
    println!(
        "tensor {:?} with shape {:?}, strides {:?}, backstrides {:?}",
        tensor,
        tensor.shape(),
        tensor.strides(),
        tensor.backstrides(),
    );
    tensor.view_mut().mapv_inplace(|x| x * 2.);

    // hand the array to the foreign side and take it back: same buffer both ways
    let data = tensor.as_slice().as_ptr();
    let handle = tensor.into_foreign();
    let pong = unsafe { JlTensor::<f32, 2>::from_foreign(handle.as_non_null())? };
    assert_eq!(pong.as_slice().as_ptr(), data);
    println!("pong {:?}", pong.view());
    assert!(pong.view().abs_diff_eq(&(&ping * 2.), 1e-8f32));

    // the same trip through the type-erased mapping the bridge holds
    let mapping = &bridge.mappings[&TypeId::of::<JlTensor<f32, 2>>()];
    let handle = (mapping.to_foreign)(Box::new(pong))?;
    let native = unsafe { (mapping.to_native)(handle.as_non_null())? };
    drop(handle);
    match native.downcast::<JlTensor<f32, 2>>() {
        Ok(t) => assert!(t.view().abs_diff_eq(&(&ping * 2.), 1e-8f32)),
        Err(_) => unreachable!("mapping produced a different native type"),
    }

    println!("collected {} arrays", rt.collect());
    Ok(())
}
