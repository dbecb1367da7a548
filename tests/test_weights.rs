use burn::backend::NdArray;
use burn::module::Module;
use hpb_generator::{
    GeneratorConfig, GeneratorError, NormKind, ParameterSet, StoredTensor,
    benchmark::synthetic_input,
    generator::Generator,
};

type TestBackend = NdArray<f32>;

fn tiny(tag: &str) -> GeneratorConfig {
    GeneratorConfig::from_tag(tag)
        .unwrap()
        .with_base_channels(4)
        .with_n_blocks(1)
        .with_unet_depth(3)
        .with_attn_heads(2)
        .with_attn_dim_head(Some(4))
        .with_height_top_k(2)
        .with_width_top_k(2)
}

fn build(config: &GeneratorConfig) -> Generator<TestBackend> {
    config.init::<TestBackend>(&Default::default()).unwrap()
}

#[test]
fn test_parameter_names_are_dotted_paths() {
    let params = build(&tiny("hpb")).parameter_set().unwrap();
    let names: Vec<&str> = params.names().collect();

    assert!(names.contains(&"stem.weight"));
    assert!(names.contains(&"down.1.conv.weight"));
    assert!(names.contains(&"body.0.attn.to_qkv.weight"));
    assert!(names.contains(&"body.0.attn.norm.gain"));
    assert!(names.contains(&"body.0.ff.project.bias"));
    assert!(names.contains(&"head.bias"));
    // bias-free projection
    assert!(!names.contains(&"body.0.attn.to_qkv.bias"));
    assert_eq!(params.get("body.0.attn.to_qkv.weight").unwrap().shape, vec![24, 16, 1, 1]);
}

#[test]
fn test_export_covers_every_parameter() {
    for tag in ["resnet", "unet", "hpb"] {
        let generator = build(&tiny(tag));
        let params = generator.parameter_set().unwrap();
        assert_eq!(params.numel(), generator.num_params(), "{tag}");
    }
}

#[test]
fn test_batch_norm_exports_running_statistics() {
    let params = build(&tiny("resnet").with_norm(NormKind::Batch)).parameter_set().unwrap();
    assert!(params.get("stem_norm.layer.running_mean").is_some());
    assert!(params.get("body.0.norm1.layer.running_var").is_some());
    assert!(params.get("body.0.norm1.layer.gamma").is_some());
    // batch norm absorbs the conv bias
    assert!(params.get("stem.bias").is_none());
}

#[test]
fn test_round_trip_reproduces_forward_output() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();

    for (tag, file) in [("hpb", "hpb.json"), ("resnet", "resnet.bin"), ("unet", "unet.bin")] {
        let config = tiny(tag).with_norm(NormKind::Batch);
        let source = build(&config);
        let path = dir.path().join(file);
        source.save_weights(&path).unwrap();

        let restored = build(&config).load_weights(&path).unwrap();
        let x = synthetic_input::<TestBackend>([1, 3, 16, 16], 11, &device);
        let expected = source.forward(x.clone()).unwrap().into_data();
        let actual = restored.forward(x).unwrap().into_data();
        assert_eq!(expected, actual, "{tag}");
    }
}

#[test]
fn test_json_and_bincode_hold_the_same_blob() {
    let dir = tempfile::tempdir().unwrap();
    let params = build(&tiny("unet")).parameter_set().unwrap();

    params.save(dir.path().join("w.json")).unwrap();
    params.save(dir.path().join("w.bin")).unwrap();
    let json = ParameterSet::load(dir.path().join("w.json")).unwrap();
    let bin = ParameterSet::load(dir.path().join("w.bin")).unwrap();
    assert_eq!(json, params);
    assert_eq!(bin, params);
}

#[test]
fn test_missing_parameter_is_fatal() {
    let config = tiny("resnet");
    let mut params = build(&config).parameter_set().unwrap();
    params.remove("body.0.conv2.weight");

    let result = build(&config).load_parameters(&params);
    assert!(matches!(result, Err(GeneratorError::MissingParameter(name)) if name == "body.0.conv2.weight"));
}

#[test]
fn test_shape_mismatch_is_fatal() {
    let config = tiny("hpb");
    let mut params = build(&config).parameter_set().unwrap();
    params.insert(
        "head.weight",
        StoredTensor {
            shape: vec![3, 4, 3, 3],
            data: vec![0.0; 108],
        },
    );

    let result = build(&config).load_parameters(&params);
    assert!(matches!(result, Err(GeneratorError::ShapeMismatch { .. })));
}

#[test]
fn test_unexpected_entries_are_fatal() {
    let config = tiny("unet");
    let mut params = build(&config).parameter_set().unwrap();
    params.insert(
        "discriminator.weight",
        StoredTensor {
            shape: vec![1],
            data: vec![0.5],
        },
    );

    let result = build(&config).load_parameters(&params);
    assert!(matches!(result, Err(GeneratorError::UnexpectedParameters(names)) if names == vec!["discriminator.weight".to_string()]));
}

#[test]
fn test_blob_from_another_architecture_is_rejected() {
    let params = build(&tiny("resnet")).parameter_set().unwrap();
    assert!(build(&tiny("hpb")).load_parameters(&params).is_err());
}
