use burn::backend::NdArray;
use burn::tensor::{Distribution, Tensor};
use hpb_generator::{
    DpsaConfig, DualPrunedSelfAttention, GeneratorError,
    layers::{InitKind, LayerBuilder},
    norm::NormKind,
};

type TestBackend = NdArray<f32>;

fn attention(dim: usize, top_k: (usize, usize)) -> DualPrunedSelfAttention<TestBackend> {
    let device = Default::default();
    let layers = LayerBuilder::<TestBackend>::new(&device, InitKind::Normal, 0.2, NormKind::Instance, true);
    DpsaConfig::new(dim)
        .with_heads(2)
        .with_dim_head(4)
        .with_height_top_k(top_k.0)
        .with_width_top_k(top_k.1)
        .init(&layers)
        .unwrap()
}

fn max_abs_diff(a: Tensor<TestBackend, 4>, b: Tensor<TestBackend, 4>) -> f32 {
    (a - b).abs().max().into_scalar()
}

#[test]
fn test_full_top_k_matches_dense_attention() {
    let device = Default::default();
    let attn = attention(6, (5, 7));
    let x = Tensor::<TestBackend, 4>::random([2, 6, 5, 7], Distribution::Normal(0.0, 1.0), &device);

    let pruned = attn.forward(x.clone());
    let dense = attn.forward_dense(x);
    assert_eq!(pruned.dims(), [2, 6, 5, 7]);
    assert!(max_abs_diff(pruned, dense) < 1e-5);
}

#[test]
fn test_oversized_top_k_is_clamped() {
    let device = Default::default();
    let attn = attention(4, (16, 16));
    let x = Tensor::<TestBackend, 4>::random([1, 4, 3, 5], Distribution::Normal(0.0, 1.0), &device);

    assert_eq!(attn.candidate_count(3, 5), 15);
    assert!(max_abs_diff(attn.forward(x.clone()), attn.forward_dense(x)) < 1e-5);
}

#[test]
fn test_pruning_reduces_candidates() {
    let device = Default::default();
    let attn = attention(4, (8, 8));
    assert_eq!(attn.candidate_count(64, 64), 64);
    assert_eq!(attn.candidate_count(64, 3), 24);

    let x = Tensor::<TestBackend, 4>::random([1, 4, 16, 12], Distribution::Normal(0.0, 1.0), &device);
    let candidates = attn.select_candidates(&attn.project(x.clone()));
    assert_eq!(candidates.count(), 64);
    // batch * heads, kept positions, dim_head
    assert_eq!(candidates.keys.dims(), [2, 64, 4]);
    assert_eq!(candidates.values.dims(), [2, 64, 4]);

    let rows = candidates.indices.rows.expect("rows are pruned");
    let cols = candidates.indices.cols.expect("columns are pruned");
    assert_eq!(rows.dims(), [2, 8]);
    assert_eq!(cols.dims(), [2, 8]);

    let out = attn.forward(x);
    assert_eq!(out.dims(), [1, 4, 16, 12]);
}

#[test]
fn test_full_size_bottleneck_keeps_sixty_four_positions() {
    let device = Default::default();
    let attn = attention(4, (8, 8));
    let x = Tensor::<TestBackend, 4>::random([1, 4, 64, 64], Distribution::Normal(0.0, 1.0), &device);

    let candidates = attn.select_candidates(&attn.project(x.clone()));
    assert_eq!(candidates.count(), 64);
    assert_eq!(candidates.keys.dims(), [2, 64, 4]);
    assert_eq!(candidates.values.dims(), [2, 64, 4]);
    assert_eq!(candidates.indices.rows.map(|rows| rows.dims()), Some([2, 8]));
    assert_eq!(candidates.indices.cols.map(|cols| cols.dims()), Some([2, 8]));

    assert_eq!(attn.forward(x).dims(), [1, 4, 64, 64]);
}

#[test]
fn test_selected_indices_are_in_bounds_and_distinct() {
    let device = Default::default();
    let attn = attention(4, (3, 2));
    let x = Tensor::<TestBackend, 4>::random([1, 4, 7, 6], Distribution::Normal(0.0, 1.0), &device);
    let candidates = attn.select_candidates(&attn.project(x));

    let rows = candidates.indices.rows.unwrap().into_data().convert::<i64>().to_vec::<i64>().unwrap();
    for head in rows.chunks(3) {
        let mut sorted = head.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
        assert!(sorted.iter().all(|&r| (0..7).contains(&r)));
    }

    let cols = candidates.indices.cols.unwrap().into_data().convert::<i64>().to_vec::<i64>().unwrap();
    assert!(cols.iter().all(|&c| (0..6).contains(&c)));
}

#[test]
fn test_pruned_attention_is_deterministic() {
    let device = Default::default();
    let attn = attention(4, (2, 2));
    let x = Tensor::<TestBackend, 4>::random([1, 4, 6, 6], Distribution::Normal(0.0, 1.0), &device);
    assert_eq!(max_abs_diff(attn.forward(x.clone()), attn.forward(x)), 0.0);
}

#[test]
fn test_zero_top_k_is_a_construction_error() {
    let device = Default::default();
    let layers = LayerBuilder::<TestBackend>::new(&device, InitKind::Normal, 0.02, NormKind::Instance, true);

    let height = DpsaConfig::new(4).with_height_top_k(0).init(&layers);
    assert!(matches!(height, Err(GeneratorError::InvalidTopK { axis: "height", value: 0 })));

    let width = DpsaConfig::new(4).with_width_top_k(0).init(&layers);
    assert!(matches!(width, Err(GeneratorError::InvalidTopK { axis: "width", value: 0 })));
}

#[test]
fn test_channel_mismatch_is_rejected() {
    let device = Default::default();
    let attn = attention(4, (2, 2));
    let x = Tensor::<TestBackend, 4>::zeros([1, 5, 4, 4], &device);
    assert!(matches!(attn.try_forward(x), Err(GeneratorError::InvalidInput { .. })));
}
