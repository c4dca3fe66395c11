//! Property and scenario tests for the layout engine.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use panemux::layout::{
    CellMetrics, GridSize, LayoutEngine, LayoutError, LayoutNode, LayoutSettings, LayoutSnapshot,
    PaneId, PaneLaunch, Rect, SplitDirection,
};
use proptest::prelude::*;

fn area() -> Rect {
    Rect::new(0.0, 0.0, 120.0, 40.0)
}

fn engine() -> LayoutEngine {
    LayoutEngine::new(area(), LayoutSettings::default())
}

fn shape(engine: &LayoutEngine) -> LayoutSnapshot {
    engine.snapshot(&|_| PaneLaunch::default())
}

#[derive(Debug, Clone)]
enum Op {
    Split(usize, SplitDirection),
    Close(usize),
    Resize(usize, f32),
}

fn direction() -> impl Strategy<Value = SplitDirection> {
    prop_oneof![
        Just(SplitDirection::Horizontal),
        Just(SplitDirection::Vertical)
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), direction()).prop_map(|(i, d)| Op::Split(i, d)),
        2 => any::<usize>().prop_map(Op::Close),
        1 => (any::<usize>(), -1.0f32..1.0).prop_map(|(i, d)| Op::Resize(i, d)),
    ]
}

fn pick(engine: &LayoutEngine, index: usize) -> PaneId {
    let panes = engine.panes();
    panes[index % panes.len()]
}

proptest! {
    /// Test that leaf count tracks splits and closes and the tree stays sound.
    #[test]
    fn test_random_operations_keep_invariants(ops in prop::collection::vec(op(), 0..40)) {
        let mut engine = engine();
        let mut splits = 0usize;
        let mut closes = 0usize;

        for op in ops {
            match op {
                Op::Split(i, d) => {
                    let pane = pick(&engine, i);
                    let new_pane = engine.split(pane, d).unwrap();
                    prop_assert_eq!(engine.active_pane(), new_pane);
                    splits += 1;
                }
                Op::Close(i) => {
                    let pane = pick(&engine, i);
                    match engine.close(pane) {
                        Ok(hint) => {
                            prop_assert!(engine.contains(hint));
                            prop_assert!(!engine.contains(pane));
                            closes += 1;
                        }
                        Err(e) => {
                            prop_assert_eq!(e, LayoutError::LastPane);
                            prop_assert_eq!(engine.pane_count(), 1);
                        }
                    }
                }
                Op::Resize(i, delta) => {
                    let pane = pick(&engine, i);
                    if let Some(split) = engine.split_of(pane) {
                        let ratio = engine.resize_divider(split, delta).unwrap();
                        prop_assert!((0.1..=0.9).contains(&ratio));
                    }
                }
            }

            prop_assert_eq!(engine.pane_count(), 1 + splits - closes);
            prop_assert!(engine.check_invariants().is_ok());
        }
    }

    /// Test that pane rectangles tile the whole area.
    #[test]
    fn test_panes_tile_the_area(ops in prop::collection::vec(op(), 0..30)) {
        let mut engine = engine();
        for op in ops {
            match op {
                Op::Split(i, d) => {
                    let pane = pick(&engine, i);
                    engine.split(pane, d).unwrap();
                }
                Op::Close(i) => {
                    let pane = pick(&engine, i);
                    let _ = engine.close(pane);
                }
                Op::Resize(i, delta) => {
                    let pane = pick(&engine, i);
                    if let Some(split) = engine.split_of(pane) {
                        engine.resize_divider(split, delta).unwrap();
                    }
                }
            }
        }

        let geometry = engine.geometry();
        let covered: f32 = geometry
            .panes
            .iter()
            .map(|(_, rect)| rect.width * rect.height)
            .sum();
        let total = area().width * area().height;
        prop_assert!((covered - total).abs() < 0.5, "covered {} of {}", covered, total);
        for (pane, _) in &geometry.panes {
            let size = engine.pane_size(*pane).unwrap();
            prop_assert!(size.cols >= 1 && size.rows >= 1);
        }
    }

    /// Test that splitting a pane and closing the new pane restores the tree.
    #[test]
    fn test_split_then_close_restores(
        setup in prop::collection::vec((any::<usize>(), direction()), 0..8),
        target in any::<usize>(),
        d in direction(),
    ) {
        let mut engine = engine();
        for (i, dir) in setup {
            let pane = pick(&engine, i);
            engine.split(pane, dir).unwrap();
        }
        let pane = pick(&engine, target);
        engine.set_focus(pane).unwrap();
        let before = shape(&engine);
        let rects_before = engine.geometry().panes;

        let new_pane = engine.split(pane, d).unwrap();
        engine.close(new_pane).unwrap();

        prop_assert_eq!(shape(&engine), before);
        prop_assert_eq!(engine.geometry().panes, rects_before);
        prop_assert_eq!(engine.active_pane(), pane);
    }

    /// Test that moving a divider by d and then -d returns to the start.
    #[test]
    fn test_resize_round_trip(d in -0.35f32..0.35, dir in direction()) {
        let mut engine = engine();
        engine.split(1, dir).unwrap();
        let split = engine.split_of(1).unwrap();

        engine.resize_divider(split, d).unwrap();
        let ratio = engine.resize_divider(split, -d).unwrap();

        prop_assert!((ratio - 0.5).abs() < 1e-5);
    }

    /// Test that ratios always stay within their bounds.
    #[test]
    fn test_resize_saturates(deltas in prop::collection::vec(-5.0f32..5.0, 1..10)) {
        let mut engine = engine();
        engine.split(1, SplitDirection::Horizontal).unwrap();
        let split = engine.split_of(1).unwrap();
        for delta in deltas {
            let ratio = engine.resize_divider(split, delta).unwrap();
            prop_assert!((0.1..=0.9).contains(&ratio));
        }
    }
}

/// Test the canonical 80x24 stacked split and close.
#[test]
fn test_vertical_split_of_80x24() {
    let mut engine = LayoutEngine::new(Rect::new(0.0, 0.0, 80.0, 24.0), LayoutSettings::default());
    let a = engine.active_pane();
    assert_eq!(engine.preview_split(a, SplitDirection::Vertical).unwrap(), GridSize::new(80, 12));

    let b = engine.split(a, SplitDirection::Vertical).unwrap();
    assert_eq!(engine.pane_size(a), Some(GridSize::new(80, 12)));
    assert_eq!(engine.pane_size(b), Some(GridSize::new(80, 12)));

    let root = engine.tree().root();
    match engine.tree().node(root) {
        Some(LayoutNode::Split {
            direction,
            ratio,
            first,
            second,
        }) => {
            assert_eq!(*direction, SplitDirection::Vertical);
            assert!((ratio - 0.5).abs() < f32::EPSILON);
            assert_eq!(engine.tree().node(*first), Some(&LayoutNode::Leaf(a)));
            assert_eq!(engine.tree().node(*second), Some(&LayoutNode::Leaf(b)));
        }
        other => panic!("expected a split at the root, got {other:?}"),
    }

    assert_eq!(engine.close(a).unwrap(), b);
    let root = engine.tree().root();
    assert_eq!(engine.tree().node(root), Some(&LayoutNode::Leaf(b)));
    assert_eq!(engine.pane_size(b), Some(GridSize::new(80, 24)));
    assert_eq!(engine.active_pane(), b);
}

/// Test that sizes follow the cell metrics and divider width.
#[test]
fn test_pixel_layout_with_divider() {
    let settings = LayoutSettings {
        cell: CellMetrics::new(8.0, 16.0),
        divider_width: 4.0,
        ..LayoutSettings::default()
    };
    let mut engine = LayoutEngine::new(Rect::new(0.0, 0.0, 644.0, 384.0), settings);
    let b = engine.split(1, SplitDirection::Horizontal).unwrap();

    assert_eq!(engine.pane_size(1), Some(GridSize::new(40, 24)));
    assert_eq!(engine.pane_size(b), Some(GridSize::new(40, 24)));

    let dividers = engine.dividers();
    assert_eq!(dividers.len(), 1);
    assert_eq!(dividers[0].rect, Rect::new(320.0, 0.0, 4.0, 384.0));
    assert_eq!(engine.divider_at(321.0, 100.0), Some(dividers[0].split));
    assert_eq!(engine.pane_at(10.0, 10.0), Some(1));
    assert_eq!(engine.pane_at(400.0, 10.0), Some(b));
}

/// Test that relayout only reports panes whose size changed.
#[test]
fn test_relayout_reports_changes_once() {
    let mut engine = engine();
    let first = engine.relayout();
    assert_eq!(first.len(), 1);
    assert!(engine.relayout().is_empty());

    let b = engine.split(1, SplitDirection::Horizontal).unwrap();
    let changed: Vec<PaneId> = engine.relayout().iter().map(|r| r.pane).collect();
    assert_eq!(changed, vec![1, b]);
    assert!(engine.relayout().is_empty());
}

/// Test that a restored layout matches the captured one.
#[test]
fn test_snapshot_restore_matches() {
    let mut engine = engine();
    let b = engine.split(1, SplitDirection::Horizontal).unwrap();
    engine.split(b, SplitDirection::Vertical).unwrap();
    let split = engine.split_of(1).unwrap();
    engine.resize_divider(split, 0.2).unwrap();

    let snapshot = shape(&engine);
    let (restored, launches) = LayoutEngine::from_snapshot(&snapshot, area(), LayoutSettings::default());

    assert_eq!(launches.len(), 3);
    assert_eq!(shape(&restored), snapshot);
    assert_eq!(restored.geometry().panes.len(), 3);
    assert!(restored.check_invariants().is_ok());
}
