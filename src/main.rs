fn main() -> anyhow::Result<()> {
    directory_admin::cli::run()
}
