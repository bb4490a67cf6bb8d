use tensile::{Shape, Tensor};

#[test]
fn fill_covers_every_element() {
    for (w, h, d) in [(1, 1, 1), (7, 3, 2), (16, 1, 4)] {
        let mut t = Tensor::with_alloc(Shape::new(w, h, d), 256).unwrap();
        t.fill(0.25);
        assert!(t.data().iter().all(|&v| v == 0.25));
        assert_eq!(t.len(), (w * h * d) as usize);
    }
}

#[test]
fn elementwise_ops_match_scalar_math() {
    let a = Tensor::from_data(Shape::new(2, 2, 1), &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let b = Tensor::from_data(Shape::new(2, 2, 1), &[4.0, 3.0, 2.0, 1.0]).unwrap();

    let mut out = Tensor::new(Shape::new(2, 2, 1)).unwrap();
    Tensor::add_into(&mut out, &a, &b).unwrap();
    assert_eq!(out.data(), &[5.0, 5.0, 5.0, 5.0]);

    Tensor::sub_into(&mut out, &a, &b).unwrap();
    assert_eq!(out.data(), &[-3.0, -1.0, 1.0, 3.0]);

    Tensor::mul_into(&mut out, &a, &b).unwrap();
    assert_eq!(out.data(), &[4.0, 6.0, 6.0, 4.0]);

    let mut scaled = a.clone();
    scaled.scale_ip(2.0);
    assert_eq!(scaled.data(), &[2.0, 4.0, 6.0, 8.0]);

    let mut rooted = Tensor::from_data(Shape::new(2, 1, 1), &[4.0, 9.0]).unwrap();
    rooted.sqrt_ip();
    assert_eq!(rooted.data(), &[2.0, 3.0]);
}

#[test]
fn mismatched_shapes_are_bad_shape_errors() {
    let a = Tensor::new(Shape::new(2, 2, 1)).unwrap();
    let b = Tensor::new(Shape::new(3, 2, 1)).unwrap();
    let mut out = Tensor::new(Shape::new(2, 2, 1)).unwrap();

    let err = Tensor::add_into(&mut out, &a, &b).unwrap_err();
    assert_eq!(err.tag(), "bad-shape");
}

#[test]
fn dot_concrete_example() {
    // A = [[1, 2, 3], [4, 5, 6]], B = [[7, 8], [9, 10], [11, 12]]
    let a = Tensor::from_data(Shape::new(3, 2, 1), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let b = Tensor::from_data(
        Shape::new(2, 3, 1),
        &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0],
    )
    .unwrap();

    let out = Tensor::dot(false, false, &a, &b).unwrap();
    assert_eq!(out.shape(), Shape::new(2, 2, 1));
    assert_eq!(out.data(), &[58.0, 64.0, 139.0, 154.0]);
}

#[test]
fn dot_transpose_variants_agree() {
    let a = Tensor::from_data(Shape::new(3, 2, 1), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let b = Tensor::from_data(
        Shape::new(2, 3, 1),
        &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0],
    )
    .unwrap();
    let a_t = Tensor::transpose(&a).unwrap();
    let b_t = Tensor::transpose(&b).unwrap();

    let plain = Tensor::dot(false, false, &a, &b).unwrap();
    assert_eq!(Tensor::dot(true, false, &a_t, &b).unwrap(), plain);
    assert_eq!(Tensor::dot(false, true, &a, &b_t).unwrap(), plain);
    assert_eq!(Tensor::dot(true, true, &a_t, &b_t).unwrap(), plain);
}

#[test]
fn dot_rejects_depth_and_misaligned_inner_dims() {
    let deep = Tensor::new(Shape::new(2, 2, 2)).unwrap();
    let flat = Tensor::new(Shape::new(2, 2, 1)).unwrap();
    assert!(Tensor::dot(false, false, &deep, &flat).is_err());

    let a = Tensor::new(Shape::new(3, 2, 1)).unwrap();
    let b = Tensor::new(Shape::new(2, 2, 1)).unwrap();
    assert_eq!(
        Tensor::dot(false, false, &a, &b).unwrap_err().tag(),
        "bad-shape"
    );
}

#[test]
fn transpose_is_an_involution() {
    let t = Tensor::from_data(Shape::new(3, 2, 1), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

    let tt = Tensor::transpose(&Tensor::transpose(&t).unwrap()).unwrap();
    assert_eq!(tt, t);

    let mut ip = t.clone();
    ip.transpose_ip().unwrap();
    assert_eq!(ip, Tensor::transpose(&t).unwrap());
    ip.transpose_ip().unwrap();
    assert_eq!(ip, t);
}

#[test]
fn im2col_concrete_example() {
    // 4x4 input, 2x2 kernel, stride 2, no padding.
    let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
    let input = Tensor::from_data(Shape::new(4, 4, 1), &data).unwrap();

    let cols = Tensor::im2col(&input, 2, 2, 0).unwrap();
    assert_eq!(cols.shape(), Shape::new(4, 4, 1));

    // First column is the top-left patch.
    assert_eq!(cols.at(0, 0, 0), 0.0);
    assert_eq!(cols.at(0, 1, 0), 1.0);
    assert_eq!(cols.at(0, 2, 0), 4.0);
    assert_eq!(cols.at(0, 3, 0), 5.0);

    // Non-overlapping stride: col2im recovers the input exactly.
    let back = Tensor::col2im(&cols, input.shape(), 2, 2, 0).unwrap();
    assert_eq!(back, input);
}

#[test]
fn im2col_padding_zeroes_the_border() {
    let input = Tensor::from_data(Shape::new(2, 2, 1), &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let cols = Tensor::im2col(&input, 3, 1, 1).unwrap();
    assert_eq!(cols.shape(), Shape::new(4, 9, 1));

    // Top-left patch: everything above and left of the image is zero.
    assert_eq!(cols.at(0, 0, 0), 0.0);
    assert_eq!(cols.at(0, 4, 0), 1.0);
}

#[test]
fn col2im_sums_overlapping_contributions() {
    let input = Tensor::from_data(Shape::new(3, 3, 1), &[1.0; 9]).unwrap();

    // Overlapping 2x2 kernels at stride 1.
    let cols = Tensor::im2col(&input, 2, 1, 0).unwrap();
    let back = Tensor::col2im(&cols, input.shape(), 2, 1, 0).unwrap();

    // The center pixel is covered by all four kernel positions.
    assert_eq!(back.at(1, 1, 0), 4.0);
    assert_eq!(back.at(0, 0, 0), 1.0);
    assert_eq!(back.at(1, 0, 0), 2.0);
}

#[test]
fn argmax_and_is_zero() {
    let mut t = Tensor::new(Shape::new(3, 3, 2)).unwrap();
    assert!(t.is_zero());

    let idx = (2 + 1 * 3 + 1 * 9) as usize;
    t.data_mut()[idx] = 5.0;
    assert!(!t.is_zero());

    let am = t.argmax();
    assert_eq!((am.x, am.y, am.z), (2, 1, 1));
}
