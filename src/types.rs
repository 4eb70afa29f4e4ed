/// Identifier for one imaged sample (one tomogram directory).
/// Examples: `Tomo_17`, `Tomo_0002_2`
pub type SpecimenToken = String;
/// Identifier for one acquisition/processing stack within a specimen.
/// Examples: `S1`, `S1_`
pub type StackToken = String;
/// Identifier for one segmented/annotated membrane within a stack.
/// Examples: `M7`, `M10`
pub type MembraneToken = String;
/// Record table column name.
/// Examples: `tomoToken`, `segPath`, `dataSplit`
pub type ColumnName = String;
/// Single textual cell value inside a record table.
/// Examples: `Tomo_17`, `14.08`, `/data/Tomo_17/membranes/T17_S1_M3.mrc`
pub type CellValue = String;
/// Particle class name used for distance channels.
/// Examples: `PSII`, `b6f`, `UK`
pub type ParticleClass = String;
