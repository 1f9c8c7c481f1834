use lumen_photos::services::{BoundingBox, SearchService};

#[test]
fn bbox_parses_the_four_comma_separated_coordinates() {
    let bbox = BoundingBox::parse("116.0,39.5, 117.0 ,40.5").expect("parse failed");
    assert_eq!(bbox.min_longitude, 116.0);
    assert_eq!(bbox.min_latitude, 39.5);
    assert_eq!(bbox.max_longitude, 117.0);
    assert_eq!(bbox.max_latitude, 40.5);
}

#[test]
fn malformed_bboxes_are_rejected() {
    assert!(BoundingBox::parse("").is_none());
    assert!(BoundingBox::parse("1,2,3").is_none());
    assert!(BoundingBox::parse("1,2,3,4,5").is_none());
    assert!(BoundingBox::parse("a,b,c,d").is_none());
}

#[test]
fn grid_cells_halve_with_every_zoom_level() {
    let zoom_4 = SearchService::grid_cell_size(4);
    let zoom_5 = SearchService::grid_cell_size(5);
    assert!((zoom_4 / zoom_5 - 2.0).abs() < 1e-9);
}

#[test]
fn grid_cell_size_stays_positive_at_extreme_zoom() {
    let deep = SearchService::grid_cell_size(30);
    assert!(deep > 0.0);
    // Zoom is clamped; going deeper changes nothing.
    assert_eq!(deep, SearchService::grid_cell_size(22));
}
