//! Fixed genre bucket table keyed by energy level.
//!
//! Buckets are inclusive-low/exclusive-high and partition [0, 1] with no gaps
//! or overlaps, which is also the tie-break rule for values landing exactly
//! on a boundary. The last bucket additionally includes 1.0 so the full range
//! is covered.

/// One row of the genre table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenreBucket {
    pub name: &'static str,
    /// Inclusive lower energy bound.
    pub energy_min: f64,
    /// Exclusive upper energy bound (inclusive for the last bucket).
    pub energy_max: f64,
    pub bpm_min: u32,
    pub bpm_max: u32,
    pub density_min: f64,
    pub density_max: f64,
    pub brightness_min: f64,
    pub brightness_max: f64,
}

/// Energy-ordered genre buckets. The lowest bucket reaches up past the
/// interpreter's energy floor so that minimal motion still lands in it.
pub const GENRE_BUCKETS: [GenreBucket; 6] = [
    GenreBucket {
        name: "ambient",
        energy_min: 0.0,
        energy_max: 0.35,
        bpm_min: 60,
        bpm_max: 78,
        density_min: 0.2,
        density_max: 0.4,
        brightness_min: 0.3,
        brightness_max: 0.45,
    },
    GenreBucket {
        name: "downtempo",
        energy_min: 0.35,
        energy_max: 0.48,
        bpm_min: 78,
        bpm_max: 95,
        density_min: 0.3,
        density_max: 0.5,
        brightness_min: 0.35,
        brightness_max: 0.55,
    },
    GenreBucket {
        name: "deep house",
        energy_min: 0.48,
        energy_max: 0.6,
        bpm_min: 100,
        bpm_max: 118,
        density_min: 0.4,
        density_max: 0.6,
        brightness_min: 0.45,
        brightness_max: 0.65,
    },
    GenreBucket {
        name: "progressive house",
        energy_min: 0.6,
        energy_max: 0.72,
        bpm_min: 118,
        bpm_max: 128,
        density_min: 0.5,
        density_max: 0.7,
        brightness_min: 0.55,
        brightness_max: 0.75,
    },
    GenreBucket {
        name: "techno",
        energy_min: 0.72,
        energy_max: 0.85,
        bpm_min: 128,
        bpm_max: 140,
        density_min: 0.6,
        density_max: 0.8,
        brightness_min: 0.6,
        brightness_max: 0.85,
    },
    GenreBucket {
        name: "drum and bass",
        energy_min: 0.85,
        energy_max: 1.0,
        bpm_min: 150,
        bpm_max: 174,
        density_min: 0.7,
        density_max: 0.95,
        brightness_min: 0.7,
        brightness_max: 0.95,
    },
];

/// Select the bucket containing `energy`.
///
/// Bounds are inclusive-low/exclusive-high, so a boundary value belongs to
/// the bucket whose lower bound it equals; energy 1.0 belongs to the last
/// bucket.
pub fn bucket_for_energy(energy: f64) -> &'static GenreBucket {
    let energy = energy.clamp(0.0, 1.0);
    GENRE_BUCKETS
        .iter()
        .find(|b| energy >= b.energy_min && energy < b.energy_max)
        .unwrap_or(&GENRE_BUCKETS[GENRE_BUCKETS.len() - 1])
}

/// Keyword categories correlated with each motion axis.
///
/// Ordered low → high intensity within each axis family.
pub const AXIS_X_TOKENS: [&str; 3] = ["deep bass", "rolling bassline", "driving sub bass"];
pub const AXIS_Y_TOKENS: [&str; 3] = ["warm pads", "lush chords", "soaring synth leads"];
pub const AXIS_Z_TOKENS: [&str; 3] = ["soft percussion", "crisp hi-hats", "punchy drums"];
