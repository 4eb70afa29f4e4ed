/// Constants used by the record table file format.
pub mod table {
    /// Leading block marker written before the header.
    pub const DATA_BLOCK: &str = "data_";
    /// Loop marker that introduces the column header.
    pub const LOOP_MARKER: &str = "loop_";
    /// Sigil prefixed to every column name in the header.
    pub const COLUMN_SIGIL: char = '_';
    /// Delimiter between row values.
    pub const VALUE_DELIMITER: char = '\t';
    /// On-disk spelling of an empty cell value.
    pub const EMPTY_CELL: &str = "\"\"";
}

/// Canonical record table column names.
pub mod columns {
    /// Specimen (tomogram) token.
    pub const SPECIMEN: &str = "tomoToken";
    /// Raw volume path at the working bin level.
    pub const TOMO_PATH: &str = "tomoPath";
    /// Membrane token.
    pub const MEMBRANE: &str = "mbToken";
    /// Segmentation file path for the membrane.
    pub const SEG_PATH: &str = "segPath";
    /// Working bin level.
    pub const TOMO_BIN: &str = "tomoBin";
    /// Denoised volume path at the reference bin level.
    pub const TOMO_REFERENCE_BIN_PATH: &str = "tomoBin4Path";
    /// Ground-truth output directory.
    pub const GT_PATH: &str = "gtPath";
    /// Pixel spacing at bin 1.
    pub const PIXEL_SPACING: &str = "pixelSpacing";
    /// Stack token.
    pub const STACK: &str = "stackToken";
    /// Unbinned z offset.
    pub const UNBINNED_OFFSET_Z: &str = "unbinnedOffsetZ";
    /// Denoised volume path at the working bin level.
    pub const TOMO_PATH_DENOISED: &str = "tomoPathDenoised";
    /// Deconvolved volume path at the working bin level.
    pub const TOMO_PATH_DECONVOLVED: &str = "tomoPathDeconvolved";
    /// Partition label column.
    pub const DATA_SPLIT: &str = "dataSplit";
    /// Per-group prediction artifact path.
    pub const HEATMAP_PATH: &str = "heatmapDir";
}

/// Constants used by the specimen directory naming convention.
pub mod naming {
    /// Prefix of the bin level marker embedded in volume file names.
    pub const BIN_MARKER_PREFIX: &str = "bin";
    /// Default substring marking denoised volumes.
    pub const DENOISED_MARKER: &str = "_denoised";
    /// Default substring marking deconvolved volumes.
    pub const DECONVOLVED_MARKER: &str = "_dimi_";
    /// Substring identifying the membrane segmentation folder.
    pub const MEMBRANES_DIR_MARKER: &str = "membranes";
    /// Substring identifying the annotated positions folder.
    pub const POSITIONS_DIR_MARKER: &str = "positions";
    /// Folder name that looks like a positions folder but carries no annotations.
    pub const NO_POSITIONS_DIR_MARKER: &str = "all_no_positions";
    /// Subfolder of `<ground truth dir>/<specimen>/` receiving copied annotations.
    pub const GROUND_TRUTH_XML_DIR: &str = "as_xml";
    /// Extension of segmentation files.
    pub const SEGMENTATION_EXT: &str = "mrc";
    /// Extension of annotation files.
    pub const ANNOTATION_EXT: &str = "xml";
    /// Marker character that starts a membrane token.
    pub const MEMBRANE_MARKER: char = 'M';
    /// Marker character that starts a stack token.
    pub const STACK_MARKER: char = 'S';
}

/// Constants used by split assignment.
pub mod splits {
    use crate::splits::SplitLabel;

    /// Total that split percentages must add up to.
    pub const RATIO_TOTAL: u32 = 100;
    /// Canonical split iteration order.
    pub const ALL_SPLITS: [SplitLabel; 3] =
        [SplitLabel::Train, SplitLabel::Validation, SplitLabel::Test];
    /// Default seed for split assignment.
    pub const DEFAULT_SEED: u64 = 42;
}

/// Constants used by subvolume aggregation.
pub mod aggregate {
    /// Prefix of distance channel names in the subvolume store.
    pub const DISTANCE_CHANNEL_PREFIX: &str = "dist_";
    /// Separator joining merged particle classes into one channel name.
    pub const CHANNEL_JOIN: &str = "_";
}

/// Constants used by prediction rejoining and CSV export.
pub mod rejoin {
    /// Suffix of per-group artifact file names.
    pub const HEATMAP_SUFFIX: &str = "_heatmap.csv";
    /// Position header columns.
    pub const POSITION_HEADERS: [&str; 3] = ["posX", "posY", "posZ"];
    /// Prefix for ground-truth distance columns.
    pub const LABEL_PREFIX: &str = "labelDist_";
    /// Prefix for predicted distance columns.
    pub const PREDICTION_PREFIX: &str = "predDist_";
    /// Normal and orientation header columns.
    pub const ORIENTATION_HEADERS: [&str; 6] = [
        "normalX",
        "normalY",
        "normalZ",
        "anglePhi",
        "angleTheta",
        "anglePsi",
    ];
    /// Default file name of the consolidated output table.
    pub const DEFAULT_TABLE_NAME: &str = "predictions.star";
}
