/// Lower bounds of each letter, best first.
const GRADES: [(f64, &str); 5] = [(0.95, "A+"), (0.90, "A"), (0.80, "B"), (0.65, "C"), (0.40, "D")];

/// Letter grade for the share (0.0 to 1.0) of a feed's snapshots that came
/// back from the validator without errors. Anything below 0.40 is an F.
pub fn grade(clean_share: f64) -> String {
    GRADES
        .iter()
        .find(|(floor, _)| clean_share >= *floor)
        .map_or("F", |(_, letter)| letter)
        .to_string()
}
