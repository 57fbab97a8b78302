use shared::domain::{LivestreamId, ProductId, VariantId};
use shared::protocol::LiveProduct;

use super::*;

fn product(id: Option<&str>, product_id: &str, variant_id: Option<&str>) -> LiveProduct {
    LiveProduct {
        id: id.map(str::to_string),
        product_id: ProductId::new(product_id),
        variant_id: variant_id.map(VariantId::new),
        is_pin: false,
        stock: 10,
        price: 100.0,
    }
}

fn board() -> ProductBoard {
    ProductBoard::new(LivestreamId::new("ls1"))
}

#[test]
fn apply_inserts_new_entries() {
    let mut board = board();
    assert!(board.apply(product(Some("lp-1"), "p1", None)));
    assert!(board.apply(product(Some("lp-2"), "p2", Some("v1"))));
    assert_eq!(board.products().len(), 2);
}

#[test]
fn apply_updates_entry_by_link_id() {
    let mut board = board();
    board.apply(product(Some("lp-1"), "p1", None));

    let mut update = product(Some("lp-1"), "p1", None);
    update.stock = 3;
    update.price = 79.0;
    assert!(board.apply(update));

    assert_eq!(board.products().len(), 1);
    assert_eq!(board.products()[0].stock, 3);
    assert_eq!(board.products()[0].price, 79.0);
}

#[test]
fn apply_matches_by_product_and_variant_when_link_id_missing() {
    let mut board = board();
    board.apply(product(None, "p1", Some("v1")));

    let mut update = product(None, "p1", Some("v1"));
    update.stock = 0;
    assert!(board.apply(update));

    assert_eq!(board.products().len(), 1);
    assert_eq!(board.products()[0].stock, 0);
}

#[test]
fn variants_of_the_same_product_stay_separate() {
    let mut board = board();
    board.apply(product(None, "p1", Some("v1")));
    assert!(board.apply(product(None, "p1", Some("v2"))));
    assert_eq!(board.products().len(), 2);
}

#[test]
fn entry_adopts_link_id_from_refresh() {
    let mut board = board();
    // Push delivered the product before the pull supplied its link id.
    board.apply(product(None, "p1", None));
    assert!(board.apply(product(Some("lp-1"), "p1", None)));

    assert_eq!(board.products().len(), 1);
    assert_eq!(board.products()[0].id.as_deref(), Some("lp-1"));
}

#[test]
fn unchanged_reapply_reports_no_change() {
    let mut board = board();
    let entry = product(Some("lp-1"), "p1", None);
    assert!(board.apply(entry.clone()));
    assert!(!board.apply(entry));
}

#[test]
fn pinning_unpins_the_rest_of_the_board() {
    let mut board = board();
    let mut first = product(Some("lp-1"), "p1", None);
    first.is_pin = true;
    board.apply(first);

    let mut second = product(Some("lp-2"), "p2", None);
    second.is_pin = true;
    assert!(board.apply(second));

    assert_eq!(board.pinned().and_then(|p| p.id.as_deref()), Some("lp-2"));
    assert_eq!(
        board.products().iter().filter(|p| p.is_pin).count(),
        1
    );
}

#[test]
fn refresh_merges_snapshot_without_duplicates() {
    let mut board = board();
    board.apply(product(Some("lp-1"), "p1", None));

    let mut updated = product(Some("lp-1"), "p1", None);
    updated.stock = 4;
    let changed = board.refresh(vec![updated, product(Some("lp-2"), "p2", None)]);

    assert!(changed);
    assert_eq!(board.products().len(), 2);
    assert_eq!(board.products()[0].stock, 4);
}
