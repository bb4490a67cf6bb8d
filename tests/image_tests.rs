use tensile::image::{self, Mat3, SampleKind};
use tensile::{Shape, Tensor};

fn gradient_image(w: u32, h: u32) -> Tensor {
    let mut t = Tensor::new(Shape::new(w, h, 1)).unwrap();
    for (i, v) in t.data_mut().iter_mut().enumerate() {
        *v = i as f32;
    }
    t
}

#[test]
fn identity_warp_preserves_the_image() {
    let img = gradient_image(5, 5);
    let out = image::transform(&img, SampleKind::Nearest, &Mat3::identity()).unwrap();
    assert_eq!(out, img);

    let bilinear = image::transform(&img, SampleKind::Bilinear, &Mat3::identity()).unwrap();
    assert_eq!(bilinear, img);
}

#[test]
fn translation_shifts_content() {
    let mut img = Tensor::new(Shape::new(4, 4, 1)).unwrap();
    img.data_mut()[0] = 9.0;

    image::translate_ip(&mut img, SampleKind::Nearest, 2.0, 1.0).unwrap();
    assert_eq!(img.at(2, 1, 0), 9.0);
    assert_eq!(img.at(0, 0, 0), 0.0);
}

#[test]
fn out_of_bounds_samples_read_zero() {
    let mut img = gradient_image(3, 3);
    // Shift almost everything out of frame.
    image::translate_ip(&mut img, SampleKind::Nearest, 10.0, 0.0).unwrap();
    assert!(img.is_zero());
}

#[test]
fn full_rotation_approximates_identity() {
    let img = gradient_image(7, 7);
    let out = image::transform(
        &img,
        SampleKind::Bilinear,
        &Mat3::rotation(2.0 * std::f32::consts::PI),
    )
    .unwrap();

    for (a, b) in out.data().iter().zip(img.data()) {
        assert!((a - b).abs() < 1e-2, "{a} vs {b}");
    }
}

#[test]
fn warp_applies_per_depth_plane() {
    let mut img = Tensor::new(Shape::new(2, 2, 2)).unwrap();
    img.data_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

    let out = image::transform(&img, SampleKind::Nearest, &Mat3::identity()).unwrap();
    assert_eq!(out.plane(0).unwrap(), img.plane(0).unwrap());
    assert_eq!(out.plane(1).unwrap(), img.plane(1).unwrap());
}

#[test]
fn near_singular_matrix_is_a_math_error() {
    let img = gradient_image(3, 3);
    let err = image::transform(&img, SampleKind::Nearest, &Mat3::scale(1e-9, 1.0)).unwrap_err();
    assert_eq!(err.tag(), "math");
}

#[test]
fn shear_keeps_the_center_row_fixed() {
    let mut img = Tensor::new(Shape::new(5, 5, 1)).unwrap();
    for x in 0..5 {
        let idx = (2 * 5 + x) as usize;
        img.data_mut()[idx] = x as f32 + 1.0;
    }

    let before_center: Vec<f32> = (0..5).map(|x| img.at(x, 2, 0)).collect();
    image::shear_ip(&mut img, SampleKind::Nearest, 0.4, 0.0).unwrap();

    // Rows shift proportionally to their distance from the center; with
    // nearest sampling the row next to the center does not move.
    let after_center: Vec<f32> = (0..5).map(|x| img.at(x, 2, 0)).collect();
    assert_eq!(before_center, after_center);
}
