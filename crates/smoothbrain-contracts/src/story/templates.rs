use indexmap::IndexMap;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use super::ShotRecord;

pub const DEFAULT_SUBJECT: &str = "the hero";
const SUBJECT_TOKEN: &str = "{subject}";

pub const ALL_GENRES: &[&str] = &[
    "action", "comedy", "drama", "horror", "scifi", "romance", "fantasy", "thriller",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoryTemplate {
    pub genre: &'static str,
    /// Beat skeletons in narrative order; `{subject}` is replaced with the concept.
    pub beats: &'static [&'static str],
}

pub const TEMPLATES: &[StoryTemplate] = &[
    StoryTemplate {
        genre: "action",
        beats: &[
            "Extreme wide shot: {subject} stands at the edge of a rooftop at sunset, the city sprawling below.",
            "Low-angle shot: {subject} sprints toward camera, buildings streaking past.",
            "Close-up: sweat on {subject}'s face, jaw set with determination.",
            "Action cam: {subject} leaps the gap between two buildings, arms reaching.",
            "Slow motion: {subject} lands hard on gravel and skids to a stop.",
            "Over-the-shoulder: {subject} faces an enemy, the air electric with tension.",
            "Dutch angle close-up: fists clench as the confrontation begins.",
            "Wide: a sweeping fight unfolds in the orange dusk.",
            "Tracking shot: {subject} slips into the crowd below and vanishes.",
            "Final wide: the skyline falls quiet again, {subject} long gone.",
        ],
    },
    StoryTemplate {
        genre: "comedy",
        beats: &[
            "Wide: {subject} wakes to find everything absurdly wrong, chaos at first glance.",
            "Reaction shot: {subject} stares at the mess in slowly dawning horror.",
            "Montage: frantic quick cuts of {subject} attempting ridiculous fixes.",
            "Close-up: a plan forms, a telltale gleam in {subject}'s eye.",
            "Wide: the plan goes spectacularly sideways and the chaos doubles.",
            "Over-the-shoulder: {subject} catches a neighbour's judging stare.",
            "Close-up: a sheepish grin as {subject} shrugs it all off.",
            "Wide: unexpected help arrives and makes things chaotically better.",
            "Warm medium shot: laughter fills the room, the mess forgotten.",
            "Final close-up: {subject} raises an eyebrow at the camera, victorious.",
        ],
    },
    StoryTemplate {
        genre: "drama",
        beats: &[
            "Wide: {subject} alone at a window, rain streaking the glass.",
            "Close-up: a worn photograph in {subject}'s hands, a memory surfacing.",
            "Flashback medium: {subject} in better days, laughing with someone now gone.",
            "Present day: slow push in on {subject}'s face, heavy with loss.",
            "A knock at the door; {subject} hesitates before answering.",
            "Two-shot: a difficult conversation, every word measured.",
            "Close-up cutaways: hands, eyes, the space between two people.",
            "Wide: {subject} makes a choice that cannot be undone.",
            "Tracking shot: {subject} walks away into uncertainty.",
            "Final: an empty chair and a single light left on.",
        ],
    },
    StoryTemplate {
        genre: "horror",
        beats: &[
            "Extreme wide: {subject} arrives at an isolated house as dusk falls.",
            "Medium: {subject} explores the rooms; something feels wrong.",
            "Close-up: {subject} finds an unsettling clue. A pause. A heartbeat.",
            "POV: something moves at the edge of frame and is gone when we look.",
            "Overhead: {subject} is being watched and does not know it yet.",
            "Jump cut: a sudden sound, {subject} spins around, nothing there.",
            "Slow crawl: the camera inches toward a closed door.",
            "Wide: the door swings open onto darkness.",
            "Chaos cut: rapid flashes of running and confusion.",
            "Final frame: silence, and one ominous detail left for the audience.",
        ],
    },
    StoryTemplate {
        genre: "scifi",
        beats: &[
            "Establishing wide: a vast futuristic cityscape with {subject} tiny against it.",
            "Close-up: {subject} studies a holographic display showing an anomaly.",
            "Cutaway: the anomaly spreads as a system begins to fail.",
            "Medium: {subject} makes a desperate call to action.",
            "Tracking: {subject} races through gleaming corridors, alarms sounding.",
            "Wide: a colossal machine looms, {subject} dwarfed by its scale.",
            "Close-up: {subject}'s gloved hands working the controls under pressure.",
            "Reaction: the countdown reaches three seconds.",
            "Flash cut: the solution, beauty and destruction at once.",
            "Final wide: silence returns among the stars as {subject} floats, breathing.",
        ],
    },
    StoryTemplate {
        genre: "romance",
        beats: &[
            "Wide: two strangers in the same crowded room; {subject} notices.",
            "POV: their eyes meet for a moment, then glance away.",
            "Montage: chance encounters, each a little longer than the last.",
            "Close-up: {subject}'s hand brushes theirs. Stillness.",
            "Medium: the first real conversation, nervous and genuine.",
            "Golden hour wide: walking side by side as the light fades.",
            "Close-up: a smile that says everything before words do.",
            "Wide: a moment of doubt as distance opens between them.",
            "Close-up: {subject} makes a choice and steps forward.",
            "Final wide: two silhouettes together against the fading sky.",
        ],
    },
    StoryTemplate {
        genre: "fantasy",
        beats: &[
            "Epic wide: a mythical landscape with {subject} at its threshold.",
            "Close-up: an ancient mark on {subject}'s hand begins to glow.",
            "Medium: a mysterious guide appears bearing a warning and a map.",
            "Montage: the journey across mountains, forests and rivers.",
            "Close-up: {subject} faces the first test, fear giving way to resolve.",
            "Wide: an impossible creature fills the frame.",
            "Slow motion: {subject} discovers a hidden power within.",
            "Wide: the final confrontation, light against shadow.",
            "Close-up: the decisive moment of sacrifice and triumph.",
            "Final wide: the world changed forever, and {subject} with it.",
        ],
    },
    StoryTemplate {
        genre: "thriller",
        beats: &[
            "Wide: {subject} tails someone through a crowded city, closing in.",
            "Close-up: a suspicious object is found and {subject}'s face drains of colour.",
            "Cutaway: a clock, a deadline, the stakes crystallising.",
            "Rapid cuts: clues pieced together across scattered locations.",
            "Medium: {subject} is confronted and something does not add up.",
            "Close-up: a lie shows in someone's eyes.",
            "Wide: the trap closes; {subject} is in deeper than expected.",
            "Over-the-shoulder: {subject} makes a dangerous call for help.",
            "Extreme close-up: a hand on a weapon, a choice, a breath.",
            "Final: silence after impact as the truth comes out at last.",
        ],
    },
];

pub fn template_for(genre: &str) -> Option<&'static StoryTemplate> {
    let genre = genre.trim().to_ascii_lowercase();
    TEMPLATES.iter().find(|template| template.genre == genre)
}

/// Weighted draw over the catalog. Genres missing from `weights` or weighted 0 are never drawn;
/// if no catalog genre has a positive weight every template is equally likely.
pub fn pick_template<R: Rng + ?Sized>(
    weights: &IndexMap<String, u32>,
    rng: &mut R,
) -> &'static StoryTemplate {
    let catalog_weights: Vec<u32> = TEMPLATES
        .iter()
        .map(|template| genre_weight(weights, template.genre))
        .collect();
    match WeightedIndex::new(&catalog_weights) {
        Ok(dist) => &TEMPLATES[dist.sample(rng)],
        Err(_) => &TEMPLATES[rng.gen_range(0..TEMPLATES.len())],
    }
}

fn genre_weight(weights: &IndexMap<String, u32>, genre: &str) -> u32 {
    weights
        .iter()
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case(genre))
        .map(|(_, weight)| *weight)
        .max()
        .unwrap_or(0)
}

pub fn fill_beat(beat: &str, subject: &str) -> String {
    let subject = subject.trim();
    let subject = if subject.is_empty() {
        DEFAULT_SUBJECT
    } else {
        subject
    };
    beat.replace(SUBJECT_TOKEN, subject)
}

/// Offline storyboard of exactly `count` shots.
///
/// Each run of beats comes from one weighted template; when a story is longer than a
/// template, the next run is drawn afresh and continues from the same narrative position.
pub fn fallback_records<R: Rng + ?Sized>(
    concept: &str,
    weights: &IndexMap<String, u32>,
    count: usize,
    rng: &mut R,
) -> Vec<ShotRecord> {
    let mut records = Vec::with_capacity(count);
    let mut template = pick_template(weights, rng);
    for idx in 0..count {
        if idx > 0 && idx % template.beats.len() == 0 {
            template = pick_template(weights, rng);
        }
        let beat = fill_beat(template.beats[idx % template.beats.len()], concept);
        records.push(ShotRecord::uniform(beat, format!("Shot {}", idx + 1)));
    }
    records
}
