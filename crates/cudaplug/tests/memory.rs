use cudaplug::{DType, DeviceBuffer, PluginError, WorkbufferRequest, Workbuffers};

fn is_execution(err: &PluginError) -> bool {
    matches!(err, PluginError::Execution { .. })
}

#[test]
fn reads_need_whole_elements() {
    let ragged = DeviceBuffer::zeroed(6);
    let err = ragged.read_f32().expect_err("6 bytes is not whole f32 values");
    assert!(is_execution(&err));
    assert!(err.to_string().contains("6 bytes"));
    assert_eq!(ragged.read_f16().expect("3 halves").len(), 3);

    let odd = DeviceBuffer::zeroed(3);
    assert!(is_execution(&odd.read_f16().expect_err("3 bytes")));
    assert!(is_execution(&odd.read_values(DType::F32).expect_err("3 bytes")));
}

#[test]
fn writes_must_fill_the_buffer_exactly() {
    let mut buffer = DeviceBuffer::zeroed(8);
    let err = buffer.write_f32(&[1.0, 2.0, 3.0]).expect_err("12 bytes into 8");
    assert!(is_execution(&err));
    // A failed write leaves the contents alone.
    assert_eq!(buffer.read_f32().expect("read"), vec![0.0, 0.0]);

    buffer.write_f32(&[1.5, -2.0]).expect("exact fit");
    assert_eq!(buffer.read_f32().expect("read"), vec![1.5, -2.0]);

    assert!(is_execution(&buffer.write_f16(&[1.0, 2.0]).expect_err("4 bytes into 8")));
    buffer
        .write_f16(&[1.0, 2.0, 3.0, 4.0])
        .expect("four halves fill 8 bytes");
    assert_eq!(buffer.read_f16().expect("read"), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn copies_need_equal_sizes() {
    let source = DeviceBuffer::from_f32(&[1.0, 2.0]);
    let mut short = DeviceBuffer::zeroed(4);
    let err = short.copy_from(&source).expect_err("8 bytes into 4");
    assert!(is_execution(&err));
    assert!(err.to_string().contains("source=8 bytes, destination=4 bytes"));

    let mut target = DeviceBuffer::zeroed(8);
    target.copy_from(&source).expect("same size");
    assert_eq!(target, source);
}

#[test]
fn half_precision_rounds_on_store() {
    let buffer = DeviceBuffer::from_values(DType::F16, &[0.1, 65504.0, -1.0]).expect("f16");
    assert_eq!(buffer.len(), 6);
    let values = buffer.read_values(DType::F16).expect("read");
    assert_eq!(values[0], 0.099975586);
    assert_eq!(&values[1..], &[65504.0, -1.0]);

    let err = DeviceBuffer::from_values(DType::I32, &[1.0]).expect_err("i32 is not float");
    assert!(is_execution(&err));
    let mut ints = DeviceBuffer::zeroed(4);
    assert!(is_execution(&ints.write_values(DType::I64, &[1.0]).expect_err("i64")));
    assert!(is_execution(&ints.read_values(DType::Bool).expect_err("bool")));
}

#[test]
fn workbuffer_accessors_check_the_index() {
    let immutable = vec![DeviceBuffer::zeroed(4)];
    let mut mutable = vec![DeviceBuffer::zeroed(8), DeviceBuffer::zeroed(16)];
    let mut workbuffers = Workbuffers::new(&immutable, &mut mutable);

    assert_eq!(workbuffers.immutable(0).expect("first").len(), 4);
    let err = workbuffers.immutable(1).expect_err("one immutable buffer");
    assert!(is_execution(&err));
    assert!(err.to_string().contains("immutable workbuffer 1 missing (1 provided)"));

    assert_eq!(workbuffers.mutable(1).expect("second").len(), 16);
    let err = workbuffers.mutable(2).expect_err("two mutable buffers");
    assert!(err.to_string().contains("mutable workbuffer 2 missing (2 provided)"));

    let mut none = Workbuffers::none();
    assert!(is_execution(&none.immutable(0).expect_err("empty")));
    assert!(is_execution(&none.mutable(0).expect_err("empty")));
}

#[test]
fn workbuffer_request_totals() {
    assert!(WorkbufferRequest::default().is_empty());
    let request = WorkbufferRequest {
        immutable_sizes: vec![16],
        mutable_sizes: vec![8, 4],
    };
    assert!(!request.is_empty());
    assert_eq!(request.total_bytes(), 28);
}
