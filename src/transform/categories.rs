pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Substring hint to storefront category, first match wins.
const CATEGORY_MAP: [(&str, &str); 6] = [
    ("electronics", "Electronics"),
    ("fashion", "Fashion"),
    ("home", "Home & Garden"),
    ("toys", "Toys & Games"),
    ("sports", "Sports & Outdoors"),
    ("beauty", "Beauty & Health"),
];

/// Maps the first hint that contains a known key. Hints are checked in order.
pub fn map_category(hints: &[&str]) -> Option<&'static str> {
    hints.iter().find_map(|hint| {
        let lowered = hint.to_lowercase();
        CATEGORY_MAP
            .iter()
            .find(|(key, _)| lowered.contains(key))
            .map(|(_, category)| *category)
    })
}
