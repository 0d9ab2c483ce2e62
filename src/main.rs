fn main() -> Result<(), Box<dyn std::error::Error>> {
    relaychat::cli::main()
}
