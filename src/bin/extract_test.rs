use progress::extract::{CoercionPolicy, ExerciseExtractor};
use progress::model::Sheet;
use progress::sheets::sheet_range;

fn sheet(title: &str, rows: &[&[&str]]) -> Sheet {
    Sheet {
        title: title.to_string(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect(),
    }
}

fn main() {
    println!("=== Extraction Test Suite ===\n");
    let header: &[&str] = &["Movement", "Sets", "Reps", "Load", "Rest", "Progression"];

    println!("Test 1: Hidden sheets are skipped");
    let sheets = vec![
        sheet("_Notes", &[&["warm up first"]]),
        sheet("Day1", &[header, &["Bench", "3", "10", "60kg", "60", "5"]]),
    ];
    let program = ExerciseExtractor::default()
        .extract("Exercises", &sheets)
        .expect("extraction failed");
    assert_eq!(program.exercises.len(), 1);
    assert_eq!(program.exercises[0].name, "Day1");
    println!("Exercises: {:?} - PASS\n", program.exercises[0].name);

    println!("Test 2: Movement columns");
    let bench = &program.exercises[0].movements[0];
    assert_eq!((bench.sets, bench.reps, bench.rest, bench.progression_rate), (3, 10, 60, 5));
    assert_eq!(bench.load, "60kg");
    println!("{} {}x{} @ {} - PASS\n", bench.name, bench.sets, bench.reps, bench.load);

    println!("Test 3: Invalid numbers become zero");
    let movement = ExerciseExtractor::default()
        .movement("Day1", 2, &["Squat", "5", "5", "100kg", "90", "x"].map(String::from))
        .expect("row rejected");
    assert_eq!(movement.progression_rate, 0);
    assert_eq!(movement.load, "100kg");
    println!("progression_rate = {} - PASS\n", movement.progression_rate);

    println!("Test 4: Leading digits policy");
    assert_eq!(CoercionPolicy::LeadingDigits.coerce("90s"), Some(90));
    assert_eq!(CoercionPolicy::Strict.coerce("90s"), None);
    println!("\"90s\" -> 90 / rejected - PASS\n");

    println!("Test 5: Range addressing");
    assert_eq!(sheet_range("Day1"), "'Day1'!A1:Z100");
    assert_eq!(sheet_range("Leg Day"), "'Leg Day'!A1:Z100");
    println!("{} - PASS\n", sheet_range("Leg Day"));

    println!("All extraction tests passed ✓");
}
